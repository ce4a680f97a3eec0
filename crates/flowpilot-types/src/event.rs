//! Lifecycle events broadcast by the workflow engine.
//!
//! `WorkflowEvent` is Clone + Send + Sync for use with tokio broadcast
//! channels. Every run-scoped event carries a per-run `sequence` that
//! increases strictly in the order the scheduler reached the transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    /// A plan was accepted by the engine.
    WorkflowCreated,
    ExecutionStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    /// A failed attempt will be retried after a backoff.
    StepRetrying,
    /// Dependencies were not met.
    StepSkipped,
    ExecutionPaused,
    ExecutionResumed,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
}

/// A single lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_type: WorkflowEventType,
    pub plan_id: Uuid,
    /// Absent for plan-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Logical clock within the run (0 for plan-level events).
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Event-specific detail (attempt numbers, errors, payloads).
    #[serde(default)]
    pub data: Value,
}

impl WorkflowEvent {
    /// Build a plan-level event (no run).
    pub fn plan(event_type: WorkflowEventType, plan_id: Uuid, data: Value) -> Self {
        Self {
            event_type,
            plan_id,
            run_id: None,
            step_id: None,
            sequence: 0,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Whether this event belongs to the given run.
    pub fn is_for_run(&self, run_id: Uuid) -> bool {
        self.run_id == Some(run_id)
    }
}
