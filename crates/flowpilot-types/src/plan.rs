//! Plan and step domain types.
//!
//! A `PlanDefinition` is the submission form of an automation plan: a named,
//! ordered list of `StepDefinition`s plus free-form metadata and tags. Once
//! accepted by the engine it is wrapped in an immutable `Plan` with an ID.
//! JSON and YAML plan files both deserialize into these types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A plan as submitted by a caller (before it is assigned an ID).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Human-readable plan name.
    pub name: String,
    /// Natural-language objective this plan was derived from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered list of top-level steps. Execution follows declaration order.
    pub steps: Vec<StepDefinition>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl PlanDefinition {
    /// Iterate over every step in the plan, depth-first, including the
    /// sub-steps of conditionals and loops.
    pub fn walk_steps(&self) -> Vec<&StepDefinition> {
        let mut out = Vec::new();
        for step in &self.steps {
            step.collect_into(&mut out);
        }
        out
    }
}

/// An accepted, immutable plan. Shared between all runs that reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// UUIDv7 assigned at creation.
    pub id: Uuid,
    /// When the plan was accepted.
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub definition: PlanDefinition,
}

impl Plan {
    /// Wrap a definition with a fresh ID.
    pub fn new(definition: PlanDefinition) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            definition,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.definition.steps
    }

    /// Build a listing summary for this plan.
    pub fn summary(&self, run_count: usize) -> PlanSummary {
        PlanSummary {
            id: self.id,
            name: self.definition.name.clone(),
            objective: self.definition.objective.clone(),
            step_count: self.definition.steps.len(),
            tags: self.definition.tags.clone(),
            created_at: self.created_at,
            run_count,
        }
    }
}

/// Listing view of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    /// Number of top-level steps.
    pub step_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Number of runs started from this plan.
    pub run_count: usize,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single unit of work in a plan.
///
/// Serialized flat, with the kind-specific fields next to the common ones:
/// ```yaml
/// - id: open-settings
///   type: action
///   action: launch_app
///   parameters: { package: com.android.settings }
///   retry_count: 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step ID, unique within a plan (sub-steps included).
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// IDs of steps that must be `Completed` before this one is eligible.
    #[serde(
        default,
        alias = "depends_on",
        alias = "dependsOn",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub dependencies: Vec<String>,
    /// Advisory per-attempt deadline handed to the actuator.
    #[serde(
        default,
        alias = "timeoutMs",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_ms: Option<u64>,
    /// Re-attempts allowed after the first attempt fails.
    #[serde(default, alias = "retryCount")]
    pub retry_count: u32,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// What a step does. Internally tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Forward a named action and its parameters to the actuator.
    #[serde(rename = "action")]
    PrimitiveAction {
        action: String,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        parameters: Map<String, Value>,
    },
    /// Suspend for a fixed duration. Always succeeds.
    Wait { duration_ms: u64 },
    /// Run `then` or `else` depending on a predicate.
    Conditional {
        condition: String,
        #[serde(rename = "then")]
        then_steps: Vec<StepDefinition>,
        #[serde(rename = "else", default, skip_serializing_if = "Vec::is_empty")]
        else_steps: Vec<StepDefinition>,
    },
    /// Repeat `body` up to `max_iterations` times while `condition` holds.
    Loop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
        body: Vec<StepDefinition>,
    },
}

impl StepDefinition {
    /// Build a primitive action step with no dependencies or retries.
    pub fn action(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            dependencies: Vec::new(),
            timeout_ms: None,
            retry_count: 0,
            kind: StepKind::PrimitiveAction {
                action: action.into(),
                parameters: Map::new(),
            },
        }
    }

    /// Build a step of any kind with no dependencies or retries.
    pub fn with_kind(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            description: None,
            dependencies: Vec::new(),
            timeout_ms: None,
            retry_count: 0,
            kind,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        if let StepKind::PrimitiveAction { parameters, .. } = &mut self.kind {
            parameters.insert(key.into(), value);
        }
        self
    }

    /// Short lowercase name of the step kind (matches the serialized tag).
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            StepKind::PrimitiveAction { .. } => "action",
            StepKind::Wait { .. } => "wait",
            StepKind::Conditional { .. } => "conditional",
            StepKind::Loop { .. } => "loop",
        }
    }

    /// Direct sub-steps (conditional branches or loop body).
    pub fn children(&self) -> Vec<&StepDefinition> {
        match &self.kind {
            StepKind::Conditional {
                then_steps,
                else_steps,
                ..
            } => then_steps.iter().chain(else_steps.iter()).collect(),
            StepKind::Loop { body, .. } => body.iter().collect(),
            _ => Vec::new(),
        }
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a StepDefinition>) {
        out.push(self);
        for child in self.children() {
            child.collect_into(out);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
