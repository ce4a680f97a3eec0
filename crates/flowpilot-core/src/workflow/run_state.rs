//! Live state of a single run.
//!
//! `RunState` is shared between the scheduler task (the only writer of step
//! results) and any number of control/query callers. The run status lives in
//! an atomic so `pause`, `resume` and `cancel` are compare-and-swap
//! transitions that never wait on the scheduler; the scheduler observes them
//! at step boundaries. A `Notify` wakes a parked scheduler when the status
//! changes and wakes `wait_finished` callers when the run is done.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flowpilot_types::event::{WorkflowEvent, WorkflowEventType};
use flowpilot_types::plan::{Plan, StepDefinition};
use flowpilot_types::run::{RunSnapshot, RunStatus, StepResult, StepStatus};
use serde_json::{Map, Value};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::event::EventBus;

#[derive(Debug, Default)]
struct RunRecord {
    step_results: HashMap<String, StepResult>,
    error: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

pub struct RunState {
    run_id: Uuid,
    plan: Arc<Plan>,
    status: AtomicU8,
    status_changed: Notify,
    finished: AtomicBool,
    record: Mutex<RunRecord>,
    context: DashMap<String, Value>,
    /// Last sequence number handed out. Held while publishing so events
    /// reach the bus in sequence order.
    sequence: Mutex<u64>,
}

impl RunState {
    /// New `Pending` run. Every top-level step starts out `Pending`.
    pub fn new(plan: Arc<Plan>, context: Map<String, Value>) -> Self {
        let step_results = plan
            .steps()
            .iter()
            .map(|s| (s.id.clone(), StepResult::pending(s.id.clone())))
            .collect();
        Self {
            run_id: Uuid::now_v7(),
            plan,
            status: AtomicU8::new(RunStatus::Pending.as_u8()),
            status_changed: Notify::new(),
            finished: AtomicBool::new(false),
            record: Mutex::new(RunRecord {
                step_results,
                ..Default::default()
            }),
            context: context.into_iter().collect(),
            sequence: Mutex::new(0),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    fn lock_record(&self) -> MutexGuard<'_, RunRecord> {
        self.record.lock().expect("run record lock poisoned")
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn status(&self) -> RunStatus {
        RunStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(RunStatus::Failed)
    }

    /// Move to `to` if the current status is one of `from`.
    ///
    /// Returns the previous status on success, or the (unchanged) current
    /// status when the transition is not allowed.
    pub fn transition(&self, from: &[RunStatus], to: RunStatus) -> Result<RunStatus, RunStatus> {
        let mut current = self.status();
        loop {
            if !from.contains(&current) {
                return Err(current);
            }
            match self.status.compare_exchange(
                current.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.status_changed.notify_waiters();
                    return Ok(current);
                }
                Err(actual) => {
                    current = RunStatus::from_u8(actual).unwrap_or(RunStatus::Failed);
                }
            }
        }
    }

    /// Park while the run is `Paused`; return the first other status seen.
    pub async fn wait_while_paused(&self) -> RunStatus {
        loop {
            let notified = self.status_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let status = self.status();
            if status != RunStatus::Paused {
                return status;
            }
            tracing::debug!(run_id = %self.run_id, "run paused at step boundary");
            notified.await;
        }
    }

    /// Mark the scheduler task as done (terminal status set, finalizers run).
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
        self.status_changed.notify_waiters();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Resolve once the scheduler task is done with this run.
    pub async fn wait_finished(&self) {
        loop {
            let notified = self.status_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }

    pub fn mark_started(&self) {
        self.lock_record().start_time = Some(Utc::now());
    }

    pub fn mark_ended(&self) {
        self.lock_record().end_time = Some(Utc::now());
    }

    pub fn set_error(&self, error: impl Into<String>) {
        self.lock_record().error = Some(error.into());
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Publish a run-scoped event with the next sequence number.
    pub fn emit(
        &self,
        bus: &EventBus,
        event_type: WorkflowEventType,
        step_id: Option<&str>,
        data: Value,
    ) {
        let mut sequence = self.sequence.lock().expect("run sequence lock poisoned");
        *sequence += 1;
        let event = WorkflowEvent {
            event_type,
            plan_id: self.plan.id,
            run_id: Some(self.run_id),
            step_id: step_id.map(str::to_string),
            sequence: *sequence,
            timestamp: Utc::now(),
            data,
        };
        tracing::debug!(
            run_id = %self.run_id,
            sequence = *sequence,
            event = ?event_type,
            step_id,
            "workflow event"
        );
        bus.publish(event);
    }

    // -----------------------------------------------------------------------
    // Step results
    // -----------------------------------------------------------------------

    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.lock_record().step_results.get(step_id).map(|r| r.status)
    }

    pub fn step_result(&self, step_id: &str) -> Option<StepResult> {
        self.lock_record().step_results.get(step_id).cloned()
    }

    /// Apply `update` to a step's result, creating it as `Pending` first if
    /// the step has not been reached before.
    pub fn update_step(&self, step_id: &str, update: impl FnOnce(&mut StepResult)) {
        let mut record = self.lock_record();
        let result = record
            .step_results
            .entry(step_id.to_string())
            .or_insert_with(|| StepResult::pending(step_id));
        update(result);
    }

    /// Dependencies of `step` that are missing or not `Completed`.
    pub fn unmet_dependencies(&self, step: &StepDefinition) -> Vec<String> {
        let record = self.lock_record();
        step.dependencies
            .iter()
            .filter(|dep| {
                record.step_results.get(dep.as_str()).map(|r| r.status)
                    != Some(StepStatus::Completed)
            })
            .cloned()
            .collect()
    }

    /// Share of top-level steps in a terminal status, 0-100.
    pub fn progress(&self) -> f64 {
        let steps = self.plan.steps();
        if steps.is_empty() {
            return 0.0;
        }
        let record = self.lock_record();
        let done = steps
            .iter()
            .filter(|s| {
                record
                    .step_results
                    .get(&s.id)
                    .is_some_and(|r| r.status.is_terminal())
            })
            .count();
        done as f64 * 100.0 / steps.len() as f64
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    pub fn context_value(&self, key: &str) -> Option<Value> {
        self.context.get(key).map(|v| v.value().clone())
    }

    pub fn set_context(&self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    pub fn context_snapshot(&self) -> Map<String, Value> {
        self.context
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> RunSnapshot {
        let progress_percentage = self.progress();
        let status = self.status();
        let record = self.lock_record();
        RunSnapshot {
            run_id: self.run_id,
            plan_id: self.plan.id,
            plan_name: self.plan.name().to_string(),
            status,
            step_results: record.step_results.clone(),
            context: self.context_snapshot(),
            error: record.error.clone(),
            progress_percentage,
            start_time: record.start_time,
            end_time: record.end_time,
        }
    }
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("run_id", &self.run_id)
            .field("plan_id", &self.plan.id)
            .field("status", &self.status())
            .finish()
    }
}
