//! Post-run finalization hooks.
//!
//! Finalizers run once per run after its terminal status is settled,
//! whatever that status is. They are best effort: an error is logged and
//! written to the run context under `finalization_error`, and never changes
//! the run's status.

use flowpilot_types::action::ActionRequest;
use flowpilot_types::run::StepStatus;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use thiserror::Error;

use super::run_state::RunState;
use crate::actuator::{ActuatorError, BoxActuator};

/// Context key holding finalizer errors (joined with "; ").
pub const FINALIZATION_ERROR_KEY: &str = "finalization_error";

/// Context key holding the run summary.
pub const SUMMARY_KEY: &str = "summary";

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("finalize action '{action}' failed: {error}")]
    ActionFailed { action: String, error: String },

    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}

/// A hook run after every run.
///
/// Returns a boxed future so heterogeneous finalizers can sit in one chain.
pub trait RunFinalizer: Send + Sync {
    fn name(&self) -> &str;

    fn finalize<'a>(&'a self, run: &'a RunState) -> BoxFuture<'a, Result<(), FinalizeError>>;
}

/// Run every finalizer in order, recording failures in the run context.
pub async fn run_finalizers(finalizers: &[Box<dyn RunFinalizer>], run: &RunState) {
    let mut errors = Vec::new();
    for finalizer in finalizers {
        if let Err(e) = finalizer.finalize(run).await {
            tracing::warn!(
                run_id = %run.run_id(),
                finalizer = finalizer.name(),
                error = %e,
                "finalizer failed"
            );
            errors.push(format!("{}: {e}", finalizer.name()));
        }
    }
    if !errors.is_empty() {
        run.set_context(FINALIZATION_ERROR_KEY, Value::String(errors.join("; ")));
    }
}

// ---------------------------------------------------------------------------
// ActionFinalizer
// ---------------------------------------------------------------------------

/// Issues a fixed actuator action after each run, e.g. to stop a screen
/// recording started by the device agent.
pub struct ActionFinalizer {
    actuator: BoxActuator,
    action: String,
}

impl ActionFinalizer {
    pub fn new(actuator: BoxActuator, action: impl Into<String>) -> Self {
        Self {
            actuator,
            action: action.into(),
        }
    }
}

impl RunFinalizer for ActionFinalizer {
    fn name(&self) -> &str {
        "action"
    }

    fn finalize<'a>(&'a self, run: &'a RunState) -> BoxFuture<'a, Result<(), FinalizeError>> {
        Box::pin(async move {
            let mut params = Map::new();
            params.insert("run_id".into(), json!(run.run_id()));
            params.insert("status".into(), json!(run.status()));
            let result = self
                .actuator
                .execute(&ActionRequest::new(self.action.clone(), params))
                .await?;
            if !result.success {
                return Err(FinalizeError::ActionFailed {
                    action: self.action.clone(),
                    error: result.error.unwrap_or_else(|| "unknown error".to_string()),
                });
            }
            tracing::debug!(run_id = %run.run_id(), action = %self.action, "finalize action issued");
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// SummaryFinalizer
// ---------------------------------------------------------------------------

/// Writes a `summary` object into the run context.
pub struct SummaryFinalizer;

impl RunFinalizer for SummaryFinalizer {
    fn name(&self) -> &str {
        "summary"
    }

    fn finalize<'a>(&'a self, run: &'a RunState) -> BoxFuture<'a, Result<(), FinalizeError>> {
        Box::pin(async move {
            let snapshot = run.snapshot();
            let count = |status: StepStatus| {
                snapshot
                    .step_results
                    .values()
                    .filter(|r| r.status == status)
                    .count()
            };
            let attempts: u32 = snapshot.step_results.values().map(|r| r.attempts).sum();
            let duration_ms = match (snapshot.start_time, snapshot.end_time) {
                (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0)),
                _ => None,
            };

            let summary = json!({
                "status": snapshot.status,
                "completed": count(StepStatus::Completed),
                "failed": count(StepStatus::Failed),
                "skipped": count(StepStatus::Skipped),
                "pending": count(StepStatus::Pending),
                "total_attempts": attempts,
                "progress_percentage": snapshot.progress_percentage,
                "duration_ms": duration_ms,
            });
            run.set_context(SUMMARY_KEY, summary);
            Ok(())
        })
    }
}
