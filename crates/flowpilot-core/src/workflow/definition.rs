//! Plan definition parsing, validation, and file loading.
//!
//! Converts between JSON/YAML documents and `PlanDefinition`, and checks the
//! structural constraints the scheduler relies on: unique step IDs across
//! the whole tree, dependencies that name real steps, conditions that parse,
//! and loops that can actually iterate.

use std::collections::HashSet;
use std::path::Path;

use flowpilot_types::plan::{PlanDefinition, StepDefinition, StepKind};
use thiserror::Error;

use super::condition::{ConditionError, parse_condition};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while reading or validating a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// JSON/YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    #[error("step '{step_id}' has an invalid condition: {source}")]
    InvalidCondition {
        step_id: String,
        #[source]
        source: ConditionError,
    },

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a JSON plan document.
pub fn parse_plan_json(json: &str) -> Result<PlanDefinition, PlanError> {
    let def: PlanDefinition =
        serde_json::from_str(json).map_err(|e| PlanError::Parse(e.to_string()))?;
    validate_plan(&def)?;
    Ok(def)
}

/// Parse and validate a YAML plan document.
pub fn parse_plan_yaml(yaml: &str) -> Result<PlanDefinition, PlanError> {
    let def: PlanDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| PlanError::Parse(e.to_string()))?;
    validate_plan(&def)?;
    Ok(def)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `PlanDefinition`.
///
/// Checks:
/// - Name is non-empty
/// - Step IDs are non-empty and unique across top-level and nested steps
/// - All dependencies and `step_completed(...)` references name existing steps
/// - Conditions parse
/// - Explicit loop bounds are >= 1
///
/// An empty step list is allowed; such a plan completes immediately.
pub fn validate_plan(def: &PlanDefinition) -> Result<(), PlanError> {
    if def.name.trim().is_empty() {
        return Err(PlanError::Validation(
            "plan name must not be empty".to_string(),
        ));
    }

    let all_steps = def.walk_steps();

    let mut seen_ids = HashSet::new();
    for step in &all_steps {
        if step.id.trim().is_empty() {
            return Err(PlanError::Validation(
                "step ID must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(PlanError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &all_steps {
        for dep in &step.dependencies {
            if !seen_ids.contains(dep.as_str()) {
                return Err(PlanError::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        validate_kind(step, &seen_ids)?;
    }

    Ok(())
}

fn validate_kind(step: &StepDefinition, known_ids: &HashSet<&str>) -> Result<(), PlanError> {
    let condition = match &step.kind {
        StepKind::PrimitiveAction { action, .. } => {
            if action.trim().is_empty() {
                return Err(PlanError::Validation(format!(
                    "action step '{}' has an empty action name",
                    step.id
                )));
            }
            None
        }
        StepKind::Wait { .. } => None,
        StepKind::Conditional { condition, .. } => Some(condition),
        StepKind::Loop {
            max_iterations,
            condition,
            ..
        } => {
            if *max_iterations == Some(0) {
                return Err(PlanError::Validation(format!(
                    "loop step '{}' must allow at least one iteration",
                    step.id
                )));
            }
            condition.as_ref()
        }
    };

    if let Some(source) = condition {
        let parsed = parse_condition(source).map_err(|source| PlanError::InvalidCondition {
            step_id: step.id.clone(),
            source,
        })?;
        for referenced in parsed.referenced_steps() {
            if !known_ids.contains(referenced) {
                return Err(PlanError::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: referenced.to_string(),
                });
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a plan from a `.json`, `.yaml` or `.yml` file.
///
/// Files with any other extension are tried as YAML, which also accepts
/// JSON documents.
pub fn load_plan_file(path: &Path) -> Result<PlanDefinition, PlanError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => parse_plan_json(&content),
        _ => parse_plan_yaml(&content),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
