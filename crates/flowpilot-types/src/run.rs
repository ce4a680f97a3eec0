//! Run (execution state) types.
//!
//! A run is one instantiation of a plan. Its status follows
//! `Pending -> Running -> {Completed | Failed | Cancelled}` with a reversible
//! `Running <-> Paused` side-loop. Each step that has been reached carries a
//! `StepResult`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Overall status of a run.
///
/// `repr(u8)` so the engine can keep it in an atomic cell that external
/// callers flip concurrently with the scheduler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunStatus {
    Pending = 0,
    Running = 1,
    Paused = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl RunStatus {
    /// Completed, Failed and Cancelled are final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`RunStatus::as_u8`]. Unknown values map to `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RunStatus::Pending),
            1 => Some(RunStatus::Running),
            2 => Some(RunStatus::Paused),
            3 => Some(RunStatus::Completed),
            4 => Some(RunStatus::Failed),
            5 => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Step status / result
// ---------------------------------------------------------------------------

/// Status of a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl StepStatus {
    /// Completed, Failed and Skipped are final for a step.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// Per-step execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    /// Payload of the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error of the last failed attempt, or the skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempts made so far (1-based once dispatched).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock time from first attempt to resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl StepResult {
    /// A step that has not been reached yet.
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            payload: None,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of a run, returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub status: RunStatus,
    /// Results keyed by step ID (top-level and sub-steps).
    pub step_results: HashMap<String, StepResult>,
    /// Caller-supplied and step-written key/value bag.
    pub context: Map<String, Value>,
    /// Error of the step that failed the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Share of top-level steps in a terminal status, 0-100.
    pub progress_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl RunSnapshot {
    /// Result for a step, if the step has been reached.
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.get(step_id)
    }

    /// Status of a step, if the step has been reached.
    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.step_results.get(step_id).map(|r| r.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_u8_roundtrip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::from_u8(status.as_u8()), Some(status));
        }
        assert_eq!(RunStatus::from_u8(42), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Paused.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Retrying.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Retrying).unwrap(),
            "\"retrying\""
        );
        assert_eq!(RunStatus::Cancelled.to_string(), "cancelled");
    }
}
