//! Run scheduler: drives one run through its plan in declaration order.
//!
//! # Execution flow
//!
//! 1. `begin` moves the run `Pending -> Running` and emits `execution_started`.
//! 2. Before each top-level step, park while `Paused`; stop if the run is no
//!    longer `Running` (cancelled).
//! 3. Skip steps whose dependencies did not complete; otherwise hand the step
//!    to the `StepExecutor`.
//! 4. The first step that fails after its retries fails the run; later steps
//!    stay `Pending`.
//! 5. A cancelled run is never overwritten with `Completed` or `Failed`.
//! 6. Finalizers run last, then `wait_finished` callers are released.

use std::sync::Arc;

use flowpilot_types::event::WorkflowEventType;
use flowpilot_types::run::RunStatus;
use serde_json::json;

use super::finalize::{RunFinalizer, run_finalizers};
use super::run_state::RunState;
use super::step_executor::{StepExecutor, StepOutcome};
use crate::event::EventBus;

enum DriveOutcome {
    /// Every top-level step was processed.
    Finished,
    Failed { step_id: String, error: String },
    /// The run left `Running` (cancelled) at a step boundary.
    Stopped,
}

pub struct RunScheduler {
    executor: Arc<StepExecutor>,
    event_bus: EventBus,
    finalizers: Vec<Box<dyn RunFinalizer>>,
}

impl RunScheduler {
    pub fn new(executor: Arc<StepExecutor>, event_bus: EventBus) -> Self {
        Self {
            executor,
            event_bus,
            finalizers: Vec::new(),
        }
    }

    /// Append a finalizer to the chain.
    pub fn with_finalizer(mut self, finalizer: impl RunFinalizer + 'static) -> Self {
        self.finalizers.push(Box::new(finalizer));
        self
    }

    /// Start a pending run. Returns `false` if the run was not `Pending`.
    pub fn begin(&self, run: &RunState) -> bool {
        if run
            .transition(&[RunStatus::Pending], RunStatus::Running)
            .is_err()
        {
            return false;
        }
        run.mark_started();
        run.emit(
            &self.event_bus,
            WorkflowEventType::ExecutionStarted,
            None,
            json!({
                "plan_name": run.plan().name(),
                "step_count": run.plan().steps().len(),
            }),
        );
        tracing::info!(
            run_id = %run.run_id(),
            plan_id = %run.plan().id,
            plan = run.plan().name(),
            "run started"
        );
        true
    }

    /// Drive `run` to a terminal status and finalize it.
    ///
    /// Starts the run first if it is still `Pending`. Returns the final status.
    pub async fn run(&self, run: &RunState) -> RunStatus {
        if run.status() == RunStatus::Pending {
            self.begin(run);
        }

        if matches!(run.status(), RunStatus::Running | RunStatus::Paused) {
            match self.drive(run).await {
                DriveOutcome::Finished => self.complete(run).await,
                DriveOutcome::Failed { step_id, error } => self.fail(run, &step_id, &error),
                DriveOutcome::Stopped => {}
            }
        }

        let status = run.status();
        if status == RunStatus::Cancelled {
            tracing::info!(run_id = %run.run_id(), "run cancelled");
        }

        run.mark_ended();
        run_finalizers(&self.finalizers, run).await;
        run.mark_finished();
        status
    }

    async fn drive(&self, run: &RunState) -> DriveOutcome {
        for step in run.plan().steps() {
            if run.wait_while_paused().await != RunStatus::Running {
                return DriveOutcome::Stopped;
            }

            let unmet = run.unmet_dependencies(step);
            if !unmet.is_empty() {
                self.executor.skip(step, run, &unmet);
                continue;
            }

            if let StepOutcome::Failed(error) = self.executor.execute(step, run).await {
                return DriveOutcome::Failed {
                    step_id: step.id.clone(),
                    error,
                };
            }
        }
        DriveOutcome::Finished
    }

    async fn complete(&self, run: &RunState) {
        // A pause that lands after the last step holds completion until resumed.
        if run.wait_while_paused().await != RunStatus::Running {
            return;
        }
        if run
            .transition(&[RunStatus::Running], RunStatus::Completed)
            .is_ok()
        {
            run.emit(
                &self.event_bus,
                WorkflowEventType::ExecutionCompleted,
                None,
                json!({ "progress_percentage": run.progress() }),
            );
            tracing::info!(run_id = %run.run_id(), "run completed");
        }
    }

    fn fail(&self, run: &RunState, step_id: &str, error: &str) {
        match run.transition(&[RunStatus::Running, RunStatus::Paused], RunStatus::Failed) {
            Ok(_) => {
                let message = format!("step '{step_id}' failed: {error}");
                run.set_error(message.clone());
                run.emit(
                    &self.event_bus,
                    WorkflowEventType::ExecutionFailed,
                    Some(step_id),
                    json!({ "error": message }),
                );
                tracing::warn!(run_id = %run.run_id(), step_id, error, "run failed");
            }
            Err(status) => {
                tracing::debug!(
                    run_id = %run.run_id(),
                    step_id,
                    %status,
                    "step failed after run left running state, keeping status"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{BoxActuator, ScriptedActuator};
    use crate::workflow::finalize::{SUMMARY_KEY, SummaryFinalizer};
    use flowpilot_types::action::ActionResult;
    use flowpilot_types::config::EngineConfig;
    use flowpilot_types::event::WorkflowEvent;
    use flowpilot_types::plan::{Plan, PlanDefinition, StepDefinition};
    use flowpilot_types::run::StepStatus;
    use serde_json::Map;
    use tokio::sync::broadcast;

    fn scheduler(scripted: &ScriptedActuator, bus: &EventBus) -> RunScheduler {
        let config = EngineConfig {
            retry_backoff_base_ms: 0,
            ..Default::default()
        };
        let executor = Arc::new(StepExecutor::new(
            BoxActuator::new(scripted.clone()),
            bus.clone(),
            &config,
        ));
        RunScheduler::new(executor, bus.clone()).with_finalizer(SummaryFinalizer)
    }

    fn run_of(steps: Vec<StepDefinition>) -> RunState {
        let plan = Plan::new(PlanDefinition {
            name: "sched".to_string(),
            objective: None,
            description: None,
            steps,
            metadata: Default::default(),
            tags: Vec::new(),
        });
        RunState::new(Arc::new(plan), Map::new())
    }

    fn events(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn retry_then_failure_scenario() {
        // A fails once then succeeds (budget 1), B depends on A, C always fails.
        let scripted = ScriptedActuator::new()
            .with_response("open", ActionResult::failed("not ready"))
            .with_fallback("broken", ActionResult::failed("element missing"));
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let sched = scheduler(&scripted, &bus);
        let run = run_of(vec![
            StepDefinition::action("A", "open").retries(1),
            StepDefinition::action("B", "tap").depends_on(["A"]),
            StepDefinition::action("C", "broken"),
        ]);

        let status = sched.run(&run).await;
        assert_eq!(status, RunStatus::Failed);

        let snap = run.snapshot();
        assert_eq!(snap.step("A").unwrap().attempts, 2);
        assert_eq!(snap.step_status("A"), Some(StepStatus::Completed));
        assert_eq!(snap.step_status("B"), Some(StepStatus::Completed));
        assert_eq!(snap.step_status("C"), Some(StepStatus::Failed));
        assert_eq!(snap.step("C").unwrap().attempts, 1);
        assert!(snap.error.as_deref().unwrap().contains("element missing"));
        assert_eq!(snap.progress_percentage, 100.0);
        assert!(snap.end_time.is_some());
        assert!(run.is_finished());

        let seen: Vec<(WorkflowEventType, Option<String>)> = events(&mut rx)
            .into_iter()
            .map(|e| (e.event_type, e.step_id))
            .collect();
        let step = |s: &str| Some(s.to_string());
        assert_eq!(
            seen,
            vec![
                (WorkflowEventType::ExecutionStarted, None),
                (WorkflowEventType::StepStarted, step("A")),
                (WorkflowEventType::StepRetrying, step("A")),
                (WorkflowEventType::StepCompleted, step("A")),
                (WorkflowEventType::StepStarted, step("B")),
                (WorkflowEventType::StepCompleted, step("B")),
                (WorkflowEventType::StepStarted, step("C")),
                (WorkflowEventType::StepFailed, step("C")),
                (WorkflowEventType::ExecutionFailed, step("C")),
            ]
        );
    }

    #[tokio::test]
    async fn failure_leaves_later_steps_pending() {
        let scripted =
            ScriptedActuator::new().with_fallback("broken", ActionResult::failed("boom"));
        let bus = EventBus::new(64);
        let sched = scheduler(&scripted, &bus);
        let run = run_of(vec![
            StepDefinition::action("a", "broken"),
            StepDefinition::action("b", "tap"),
            StepDefinition::action("c", "tap"),
        ]);

        assert_eq!(sched.run(&run).await, RunStatus::Failed);
        assert_eq!(run.step_status("b"), Some(StepStatus::Pending));
        assert_eq!(run.step_status("c"), Some(StepStatus::Pending));
        assert_eq!(scripted.call_count("tap"), 0);
    }

    #[tokio::test]
    async fn skips_propagate_without_failing_the_run() {
        let scripted = ScriptedActuator::new();
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let sched = scheduler(&scripted, &bus);
        // `b` depends on a later step, so it is skipped; `c` depends on `b`.
        let run = run_of(vec![
            StepDefinition::action("a", "tap"),
            StepDefinition::action("b", "tap").depends_on(["d"]),
            StepDefinition::action("c", "tap").depends_on(["b"]),
            StepDefinition::action("d", "tap"),
        ]);

        assert_eq!(sched.run(&run).await, RunStatus::Completed);
        assert_eq!(run.step_status("b"), Some(StepStatus::Skipped));
        assert_eq!(run.step_status("c"), Some(StepStatus::Skipped));
        assert_eq!(run.step_status("d"), Some(StepStatus::Completed));
        assert_eq!(
            run.step_result("c").unwrap().error.as_deref(),
            Some("dependencies not met")
        );

        let kinds: Vec<_> = events(&mut rx).into_iter().map(|e| e.event_type).collect();
        assert_eq!(kinds.last(), Some(&WorkflowEventType::ExecutionCompleted));
        assert_eq!(
            kinds
                .iter()
                .filter(|k| **k == WorkflowEventType::StepSkipped)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn dependency_on_failed_step_is_skipped() {
        let scripted = ScriptedActuator::new();
        let bus = EventBus::new(64);
        let sched = scheduler(&scripted, &bus);
        let run = run_of(vec![
            StepDefinition::action("x", "tap"),
            StepDefinition::action("y", "tap").depends_on(["x"]),
        ]);
        run.update_step("x", |r| r.status = StepStatus::Failed);

        let y = run.plan().steps()[1].clone();
        let unmet = run.unmet_dependencies(&y);
        assert_eq!(unmet, vec!["x"]);
        sched.executor.skip(&y, &run, &unmet);
        assert_eq!(run.step_status("y"), Some(StepStatus::Skipped));
    }

    #[tokio::test]
    async fn empty_plan_completes_immediately() {
        let scripted = ScriptedActuator::new();
        let bus = EventBus::new(8);
        let sched = scheduler(&scripted, &bus);
        let run = run_of(vec![]);

        assert_eq!(sched.run(&run).await, RunStatus::Completed);
        assert_eq!(run.progress(), 0.0);
        assert!(run.context_value(SUMMARY_KEY).is_some());
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing_but_finalizes() {
        let scripted = ScriptedActuator::new();
        let bus = EventBus::new(8);
        let sched = scheduler(&scripted, &bus);
        let run = run_of(vec![StepDefinition::action("a", "tap")]);
        run.transition(&[RunStatus::Pending], RunStatus::Cancelled)
            .unwrap();

        assert_eq!(sched.run(&run).await, RunStatus::Cancelled);
        assert!(scripted.calls().is_empty());
        assert_eq!(run.step_status("a"), Some(StepStatus::Pending));
        assert_eq!(
            run.context_value(SUMMARY_KEY).unwrap()["status"],
            "cancelled"
        );
        assert!(run.is_finished());
    }
}
