//! `{{ path }}` placeholder resolution for action parameters.
//!
//! A path is matched against the longest context key that is a dotted prefix
//! of it, then the remaining segments descend into that JSON value (object
//! fields or array indices). So with `steps.login` in the context,
//! `{{ steps.login.token }}` reads the `token` field of that step's payload.
//! Unresolved placeholders are left verbatim.

use serde_json::{Map, Value};

/// Look up a dotted path. `get` reads a single top-level context key.
pub fn lookup_path(path: &str, get: impl Fn(&str) -> Option<Value>) -> Option<Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let segments: Vec<&str> = path.split('.').collect();

    for split in (1..=segments.len()).rev() {
        let key = segments[..split].join(".");
        if let Some(root) = get(&key) {
            return descend(root, &segments[split..]);
        }
    }
    None
}

fn descend(mut value: Value, segments: &[&str]) -> Option<Value> {
    for segment in segments {
        value = match value {
            Value::Object(mut map) => map.remove(*segment)?,
            Value::Array(mut items) => {
                let index: usize = segment.parse().ok()?;
                if index >= items.len() {
                    return None;
                }
                items.swap_remove(index)
            }
            _ => return None,
        };
    }
    Some(value)
}

/// Render a value for splicing into a larger string.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every resolvable `{{ path }}` in `template`.
pub fn resolve_template(template: &str, get: &impl Fn(&str) -> Option<Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len + 2;
        out.push_str(&rest[..start]);
        let path = &rest[start + 2..end - 2];
        match lookup_path(path, get) {
            Some(value) => out.push_str(&render(&value)),
            None => out.push_str(&rest[start..end]),
        }
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

/// Resolve placeholders in a JSON value, recursing into arrays and objects.
///
/// A string that is exactly one placeholder is replaced by the referenced
/// value itself, keeping its JSON type.
pub fn resolve_value(value: &Value, get: &impl Fn(&str) -> Option<Value>) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(inner) = trimmed
                .strip_prefix("{{")
                .and_then(|t| t.strip_suffix("}}"))
                .filter(|inner| !inner.contains("{{") && !inner.contains("}}"))
            {
                if let Some(found) = lookup_path(inner, get) {
                    return found;
                }
            }
            Value::String(resolve_template(s, get))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, get)).collect()),
        Value::Object(map) => Value::Object(resolve_params(map, get)),
        other => other.clone(),
    }
}

/// Resolve placeholders in an action's parameter map.
pub fn resolve_params(
    params: &Map<String, Value>,
    get: &impl Fn(&str) -> Option<Value>,
) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, get)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "user": "ada",
            "steps.login": { "token": "abc123", "ids": [10, 20] },
            "steps": { "shadowed": true },
            "count": 3
        }) else {
            unreachable!()
        };
        map
    }

    fn getter(ctx: &Map<String, Value>) -> impl Fn(&str) -> Option<Value> + '_ {
        move |key| ctx.get(key).cloned()
    }

    #[test]
    fn longest_prefix_wins() {
        let ctx = context();
        assert_eq!(
            lookup_path("steps.login.token", getter(&ctx)),
            Some(json!("abc123"))
        );
        assert_eq!(lookup_path("steps.login.ids.1", getter(&ctx)), Some(json!(20)));
        assert_eq!(lookup_path("steps.shadowed", getter(&ctx)), Some(json!(true)));
        assert_eq!(lookup_path("steps.login.missing", getter(&ctx)), None);
        assert_eq!(lookup_path("", getter(&ctx)), None);
    }

    #[test]
    fn template_splices_and_leaves_unknowns() {
        let ctx = context();
        let get = getter(&ctx);
        assert_eq!(
            resolve_template("hi {{ user }}, you have {{count}} items {{ nope }}", &get),
            "hi ada, you have 3 items {{ nope }}"
        );
        assert_eq!(resolve_template("unclosed {{ user", &get), "unclosed {{ user");
    }

    #[test]
    fn whole_placeholder_keeps_json_type() {
        let ctx = context();
        let get = getter(&ctx);
        let params = json!({
            "ids": "{{ steps.login.ids }}",
            "label": "token={{ steps.login.token }}",
            "nested": { "n": ["{{ count }}"] },
            "flag": false
        });
        let Value::Object(params) = params else { unreachable!() };

        let resolved = resolve_params(&params, &get);
        assert_eq!(resolved["ids"], json!([10, 20]));
        assert_eq!(resolved["label"], json!("token=abc123"));
        assert_eq!(resolved["nested"]["n"][0], json!(3));
        assert_eq!(resolved["flag"], json!(false));
    }
}
