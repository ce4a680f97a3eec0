//! Step executor: runs one step to resolution under its retry budget.
//!
//! `StepExecutor::execute` owns a step's whole lifecycle within a run:
//! mark it `Running`, emit `step_started`, dispatch by kind, and on failure
//! either record `Retrying` and back off, or record `Failed`. The same path
//! is used for top-level steps and for the sub-steps of conditionals and
//! loops, so nested steps get identical retry, gating and event behaviour.

use std::time::{Duration, Instant};

use chrono::Utc;
use flowpilot_types::action::ActionRequest;
use flowpilot_types::config::EngineConfig;
use flowpilot_types::event::WorkflowEventType;
use flowpilot_types::plan::{StepDefinition, StepKind};
use flowpilot_types::run::{RunStatus, StepStatus};
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use thiserror::Error;

use super::condition::{ConditionError, parse_condition};
use super::retry::RetryPolicy;
use super::run_state::RunState;
use super::template;
use crate::actuator::{ActuatorError, BoxActuator};
use crate::event::EventBus;

/// Skip reason recorded on steps whose dependencies did not complete.
pub const DEPENDENCIES_NOT_MET: &str = "dependencies not met";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum StepError {
    /// The actuator ran the action and reported failure.
    #[error("action '{action}' failed: {error}")]
    ActionFailed { action: String, error: String },

    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    #[error("condition error: {0}")]
    Condition(#[from] ConditionError),

    #[error("sub-step '{step_id}' failed: {error}")]
    SubStepFailed { step_id: String, error: String },
}

/// Final outcome of a step after its retry budget.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed(Value),
    Failed(String),
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

pub struct StepExecutor {
    actuator: BoxActuator,
    event_bus: EventBus,
    retry: RetryPolicy,
    default_loop_max_iterations: u32,
}

impl StepExecutor {
    pub fn new(actuator: BoxActuator, event_bus: EventBus, config: &EngineConfig) -> Self {
        Self {
            actuator,
            event_bus,
            retry: RetryPolicy::from_config(config),
            default_loop_max_iterations: config.default_loop_max_iterations.max(1),
        }
    }

    pub fn actuator(&self) -> &BoxActuator {
        &self.actuator
    }

    /// Record `step` as skipped because `unmet` dependencies did not complete.
    pub fn skip(&self, step: &StepDefinition, run: &RunState, unmet: &[String]) {
        tracing::info!(
            run_id = %run.run_id(),
            step_id = %step.id,
            unmet = ?unmet,
            "skipping step, dependencies not met"
        );
        run.update_step(&step.id, |r| {
            r.status = StepStatus::Skipped;
            r.error = Some(DEPENDENCIES_NOT_MET.to_string());
            r.completed_at = Some(Utc::now());
        });
        run.emit(
            &self.event_bus,
            WorkflowEventType::StepSkipped,
            Some(&step.id),
            json!({ "reason": DEPENDENCIES_NOT_MET, "unmet": unmet }),
        );
    }

    /// Run `step` until it completes or its retry budget is exhausted.
    ///
    /// Dependencies are NOT checked here; callers gate first.
    pub fn execute<'a>(
        &'a self,
        step: &'a StepDefinition,
        run: &'a RunState,
    ) -> BoxFuture<'a, StepOutcome> {
        Box::pin(async move {
            let started = Instant::now();
            let started_at = Utc::now();
            run.update_step(&step.id, |r| {
                r.status = StepStatus::Running;
                r.attempts = 0;
                r.payload = None;
                r.error = None;
                r.started_at = Some(started_at);
                r.completed_at = None;
                r.duration_ms = None;
            });
            run.emit(
                &self.event_bus,
                WorkflowEventType::StepStarted,
                Some(&step.id),
                json!({
                    "kind": step.kind_name(),
                    "max_attempts": RetryPolicy::max_attempts(step.retry_count),
                }),
            );

            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                run.update_step(&step.id, |r| {
                    r.status = StepStatus::Running;
                    r.attempts = attempt;
                });
                tracing::debug!(
                    run_id = %run.run_id(),
                    step_id = %step.id,
                    kind = step.kind_name(),
                    attempt,
                    "dispatching step"
                );

                let error = match self.dispatch(step, run).await {
                    Ok(payload) => {
                        let duration_ms = elapsed_ms(started);
                        run.update_step(&step.id, |r| {
                            r.status = StepStatus::Completed;
                            r.payload = Some(payload.clone());
                            r.error = None;
                            r.completed_at = Some(Utc::now());
                            r.duration_ms = Some(duration_ms);
                        });
                        run.set_context(format!("steps.{}", step.id), payload.clone());
                        run.emit(
                            &self.event_bus,
                            WorkflowEventType::StepCompleted,
                            Some(&step.id),
                            json!({
                                "attempts": attempt,
                                "duration_ms": duration_ms,
                                "payload": &payload,
                            }),
                        );
                        tracing::info!(
                            run_id = %run.run_id(),
                            step_id = %step.id,
                            attempts = attempt,
                            duration_ms,
                            "step completed"
                        );
                        return StepOutcome::Completed(payload);
                    }
                    Err(e) => e.to_string(),
                };

                if self.retry.should_retry(attempt, step.retry_count) {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        run_id = %run.run_id(),
                        step_id = %step.id,
                        attempt,
                        delay_ms = delay_ms(delay),
                        error = %error,
                        "step attempt failed, retrying"
                    );
                    run.update_step(&step.id, |r| {
                        r.status = StepStatus::Retrying;
                        r.error = Some(error.clone());
                    });
                    run.emit(
                        &self.event_bus,
                        WorkflowEventType::StepRetrying,
                        Some(&step.id),
                        json!({
                            "attempt": attempt,
                            "next_attempt": attempt + 1,
                            "delay_ms": delay_ms(delay),
                            "error": &error,
                        }),
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    continue;
                }

                let duration_ms = elapsed_ms(started);
                run.update_step(&step.id, |r| {
                    r.status = StepStatus::Failed;
                    r.error = Some(error.clone());
                    r.completed_at = Some(Utc::now());
                    r.duration_ms = Some(duration_ms);
                });
                run.emit(
                    &self.event_bus,
                    WorkflowEventType::StepFailed,
                    Some(&step.id),
                    json!({ "attempts": attempt, "error": &error }),
                );
                tracing::warn!(
                    run_id = %run.run_id(),
                    step_id = %step.id,
                    attempts = attempt,
                    error = %error,
                    "step failed, retry budget exhausted"
                );
                return StepOutcome::Failed(error);
            }
        })
    }

    // -----------------------------------------------------------------------
    // Dispatch by kind
    // -----------------------------------------------------------------------

    async fn dispatch(&self, step: &StepDefinition, run: &RunState) -> Result<Value, StepError> {
        match &step.kind {
            StepKind::PrimitiveAction { action, parameters } => {
                let params = template::resolve_params(parameters, &|key: &str| run.context_value(key));
                let request = ActionRequest::new(action.clone(), params).with_timeout(step.timeout_ms);
                let result = self.actuator.execute(&request).await?;
                if result.success {
                    Ok(Value::Object(result.payload))
                } else {
                    Err(StepError::ActionFailed {
                        action: action.clone(),
                        error: result
                            .error
                            .unwrap_or_else(|| "actuator reported failure".to_string()),
                    })
                }
            }
            StepKind::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                Ok(json!({ "waited_ms": duration_ms }))
            }
            StepKind::Conditional {
                condition,
                then_steps,
                else_steps,
            } => {
                let parsed = parse_condition(condition)?;
                let met = parsed.evaluate(run, &self.actuator).await?;
                let (branch, steps) = if met {
                    ("then", then_steps)
                } else {
                    ("else", else_steps)
                };
                tracing::debug!(step_id = %step.id, met, branch, "condition evaluated");
                let (executed, halted) = self.run_sub_steps(steps, run).await?;
                Ok(json!({
                    "condition_met": met,
                    "branch": branch,
                    "executed_steps": executed,
                    "halted": halted,
                }))
            }
            StepKind::Loop {
                max_iterations,
                condition,
                body,
            } => {
                let max = max_iterations.unwrap_or(self.default_loop_max_iterations);
                let parsed = condition.as_deref().map(parse_condition).transpose()?;

                let mut iterations: u32 = 0;
                let mut exit = "max_iterations";
                while iterations < max {
                    if run.wait_while_paused().await != RunStatus::Running {
                        exit = "cancelled";
                        break;
                    }
                    if let Some(condition) = &parsed {
                        if !condition.evaluate(run, &self.actuator).await? {
                            exit = "condition_false";
                            break;
                        }
                    }
                    let (_, halted) = self.run_sub_steps(body, run).await?;
                    if halted {
                        exit = "cancelled";
                        break;
                    }
                    iterations += 1;
                }
                tracing::debug!(step_id = %step.id, iterations, exit, "loop finished");
                Ok(json!({ "iterations": iterations, "exit": exit }))
            }
        }
    }

    /// Run sub-steps in order with the usual dependency gate.
    ///
    /// Each sub-step boundary honours pause and cancel the same way the
    /// scheduler does between top-level steps. Returns the IDs that completed
    /// and whether dispatch stopped early because the run left `Running`.
    /// The first failure aborts the rest.
    async fn run_sub_steps(
        &self,
        steps: &[StepDefinition],
        run: &RunState,
    ) -> Result<(Vec<String>, bool), StepError> {
        let mut executed = Vec::new();
        for sub in steps {
            if run.wait_while_paused().await != RunStatus::Running {
                tracing::debug!(
                    run_id = %run.run_id(),
                    step_id = %sub.id,
                    "sub-step dispatch stopped, run no longer running"
                );
                return Ok((executed, true));
            }
            let unmet = run.unmet_dependencies(sub);
            if !unmet.is_empty() {
                self.skip(sub, run, &unmet);
                continue;
            }
            match self.execute(sub, run).await {
                StepOutcome::Completed(_) => executed.push(sub.id.clone()),
                StepOutcome::Failed(error) => {
                    return Err(StepError::SubStepFailed {
                        step_id: sub.id.clone(),
                        error,
                    });
                }
            }
        }
        Ok((executed, false))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn delay_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::actuator::ScriptedActuator;
    use crate::actuator::scripted::FIND_ELEMENT_ACTION;
    use flowpilot_types::action::ActionResult;
    use flowpilot_types::event::WorkflowEvent;
    use flowpilot_types::plan::{Plan, PlanDefinition};
    use serde_json::Map;
    use tokio::sync::broadcast;

    fn config() -> EngineConfig {
        EngineConfig {
            retry_backoff_base_ms: 0,
            ..Default::default()
        }
    }

    fn setup(
        scripted: &ScriptedActuator,
        steps: Vec<StepDefinition>,
    ) -> (StepExecutor, RunState, broadcast::Receiver<WorkflowEvent>) {
        let bus = EventBus::new(256);
        let rx = bus.subscribe();
        let executor = StepExecutor::new(BoxActuator::new(scripted.clone()), bus, &config());
        let plan = Plan::new(PlanDefinition {
            name: "exec".to_string(),
            objective: None,
            description: None,
            steps,
            metadata: Default::default(),
            tags: Vec::new(),
        });
        let mut context = Map::new();
        context.insert("user".into(), json!("ada"));
        let run = RunState::new(Arc::new(plan), context);
        run.transition(&[RunStatus::Pending], RunStatus::Running).unwrap();
        (executor, run, rx)
    }

    fn drain(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<(WorkflowEventType, String)> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push((e.event_type, e.step_id.unwrap_or_default()));
        }
        out
    }

    #[tokio::test]
    async fn action_succeeds_after_one_retry() {
        let scripted = ScriptedActuator::new().with_response("tap", ActionResult::failed("busy"));
        let step = StepDefinition::action("a", "tap").retries(1);
        let (executor, run, mut rx) = setup(&scripted, vec![step.clone()]);

        let outcome = executor.execute(&step, &run).await;
        assert!(matches!(outcome, StepOutcome::Completed(_)));

        let result = run.step_result("a").unwrap();
        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.attempts, 2);
        assert!(result.duration_ms.is_some());
        assert_eq!(scripted.call_count("tap"), 2);

        let kinds: Vec<_> = drain(&mut rx).into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![
                WorkflowEventType::StepStarted,
                WorkflowEventType::StepRetrying,
                WorkflowEventType::StepCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn budget_zero_fails_after_single_attempt() {
        let scripted =
            ScriptedActuator::new().with_fallback("tap", ActionResult::failed("no such element"));
        let step = StepDefinition::action("c", "tap");
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);

        let outcome = executor.execute(&step, &run).await;
        match outcome {
            StepOutcome::Failed(error) => assert!(error.contains("no such element")),
            other => panic!("expected failure, got {other:?}"),
        }
        let result = run.step_result("c").unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn exhausted_budget_makes_budget_plus_one_attempts() {
        let scripted = ScriptedActuator::new().with_fallback("tap", ActionResult::failed("nope"));
        let step = StepDefinition::action("a", "tap").retries(3);
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);

        executor.execute(&step, &run).await;
        assert_eq!(run.step_result("a").unwrap().attempts, 4);
        assert_eq!(scripted.call_count("tap"), 4);
    }

    #[tokio::test]
    async fn transport_errors_are_retried_like_action_failures() {
        let scripted = ScriptedActuator::new().with_transport_error("tap", "connection refused");
        let step = StepDefinition::action("a", "tap").retries(1);
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);

        assert!(matches!(
            executor.execute(&step, &run).await,
            StepOutcome::Completed(_)
        ));
        assert_eq!(run.step_result("a").unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn action_params_are_templated_and_timeout_forwarded() {
        let scripted = ScriptedActuator::new();
        let mut step = StepDefinition::action("greet", "type_text").param("text", json!("hi {{ user }}"));
        step.timeout_ms = Some(1500);
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);

        executor.execute(&step, &run).await;
        let call = &scripted.calls()[0];
        assert_eq!(call.params["text"], "hi ada");
        assert_eq!(call.timeout_ms, Some(1500));
    }

    #[tokio::test]
    async fn completed_payload_lands_in_context() {
        let mut payload = Map::new();
        payload.insert("token".into(), json!("t-1"));
        let scripted = ScriptedActuator::new().with_response("login", ActionResult::ok(payload));
        let login = StepDefinition::action("login", "login");
        let use_token =
            StepDefinition::action("use", "type_text").param("text", json!("{{ steps.login.token }}"));
        let (executor, run, _rx) = setup(&scripted, vec![login.clone(), use_token.clone()]);

        executor.execute(&login, &run).await;
        executor.execute(&use_token, &run).await;
        assert_eq!(run.context_value("steps.login").unwrap()["token"], "t-1");
        assert_eq!(scripted.calls()[1].params["text"], "t-1");
    }

    #[tokio::test]
    async fn wait_step_always_succeeds() {
        let scripted = ScriptedActuator::new();
        let step = StepDefinition::with_kind("pause", StepKind::Wait { duration_ms: 5 });
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);

        let outcome = executor.execute(&step, &run).await;
        assert_eq!(outcome, StepOutcome::Completed(json!({ "waited_ms": 5 })));
        assert!(scripted.calls().is_empty());
    }

    #[tokio::test]
    async fn conditional_runs_matching_branch_only() {
        let scripted = ScriptedActuator::new().with_visible_element("Allow");
        let step = StepDefinition::with_kind(
            "maybe",
            StepKind::Conditional {
                condition: "element_exists('Allow')".to_string(),
                then_steps: vec![StepDefinition::action("tap-allow", "tap")],
                else_steps: vec![StepDefinition::action("go-back", "back")],
            },
        );
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);

        let outcome = executor.execute(&step, &run).await;
        let StepOutcome::Completed(payload) = outcome else {
            panic!("conditional should complete");
        };
        assert_eq!(payload["branch"], "then");
        assert_eq!(payload["executed_steps"], json!(["tap-allow"]));
        assert_eq!(run.step_status("tap-allow"), Some(StepStatus::Completed));
        assert_eq!(run.step_status("go-back"), None);
        assert_eq!(scripted.call_count("back"), 0);
    }

    #[tokio::test]
    async fn failing_sub_step_fails_parent_attempt() {
        let scripted = ScriptedActuator::new().with_fallback("tap", ActionResult::failed("gone"));
        let step = StepDefinition::with_kind(
            "branch",
            StepKind::Conditional {
                condition: "true".to_string(),
                then_steps: vec![
                    StepDefinition::action("inner", "tap"),
                    StepDefinition::action("after", "swipe"),
                ],
                else_steps: vec![],
            },
        );
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);

        let outcome = executor.execute(&step, &run).await;
        let StepOutcome::Failed(error) = outcome else {
            panic!("parent should fail");
        };
        assert!(error.contains("sub-step 'inner' failed"));
        assert_eq!(run.step_status("inner"), Some(StepStatus::Failed));
        assert_eq!(run.step_status("after"), None);
    }

    #[tokio::test]
    async fn loop_stops_when_condition_turns_false() {
        let mut found = Map::new();
        found.insert("found".into(), json!(true));
        // Spinner visible for two checks, then gone.
        let scripted = ScriptedActuator::new()
            .with_response(FIND_ELEMENT_ACTION, ActionResult::ok(found.clone()))
            .with_response(FIND_ELEMENT_ACTION, ActionResult::ok(found));
        let step = StepDefinition::with_kind(
            "poll",
            StepKind::Loop {
                max_iterations: Some(10),
                condition: Some("element_exists('Loading')".to_string()),
                body: vec![StepDefinition::action("refresh", "swipe")],
            },
        );
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);

        let outcome = executor.execute(&step, &run).await;
        assert_eq!(
            outcome,
            StepOutcome::Completed(json!({ "iterations": 2, "exit": "condition_false" }))
        );
        assert_eq!(scripted.call_count("swipe"), 2);
        assert_eq!(run.step_status("refresh"), Some(StepStatus::Completed));
    }

    #[tokio::test]
    async fn loop_without_condition_runs_max_iterations() {
        let scripted = ScriptedActuator::new();
        let step = StepDefinition::with_kind(
            "repeat",
            StepKind::Loop {
                max_iterations: Some(3),
                condition: None,
                body: vec![StepDefinition::action("tick", "tap")],
            },
        );
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);

        let outcome = executor.execute(&step, &run).await;
        assert_eq!(
            outcome,
            StepOutcome::Completed(json!({ "iterations": 3, "exit": "max_iterations" }))
        );
        assert_eq!(scripted.call_count("tap"), 3);
    }

    #[test]
    fn delay_millis_saturate() {
        assert_eq!(delay_ms(Duration::from_secs(4)), 4000);
        assert_eq!(delay_ms(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn loop_on_cancelled_run_dispatches_nothing() {
        let scripted = ScriptedActuator::new();
        let step = StepDefinition::with_kind(
            "repeat",
            StepKind::Loop {
                max_iterations: Some(5),
                condition: None,
                body: vec![StepDefinition::action("tick", "tap")],
            },
        );
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);
        run.transition(&[RunStatus::Running], RunStatus::Cancelled).unwrap();

        let outcome = executor.execute(&step, &run).await;
        assert_eq!(
            outcome,
            StepOutcome::Completed(json!({ "iterations": 0, "exit": "cancelled" }))
        );
        assert_eq!(scripted.call_count("tap"), 0);
        assert_eq!(run.step_status("tick"), None);
    }

    #[tokio::test]
    async fn paused_branch_waits_for_resume() {
        let scripted = ScriptedActuator::new();
        let step = StepDefinition::with_kind(
            "branch",
            StepKind::Conditional {
                condition: "true".to_string(),
                then_steps: vec![StepDefinition::action("inner", "tap")],
                else_steps: vec![],
            },
        );
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);
        let run = Arc::new(run);
        run.transition(&[RunStatus::Running], RunStatus::Paused).unwrap();

        let task = {
            let run = Arc::clone(&run);
            let step = step.clone();
            tokio::spawn(async move { executor.execute(&step, &run).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scripted.call_count("tap"), 0);

        run.transition(&[RunStatus::Paused], RunStatus::Running).unwrap();
        let StepOutcome::Completed(payload) = task.await.unwrap() else {
            panic!("branch should complete after resume");
        };
        assert_eq!(payload["executed_steps"], json!(["inner"]));
        assert_eq!(payload["halted"], false);
        assert_eq!(scripted.call_count("tap"), 1);
    }

    #[tokio::test]
    async fn sub_step_with_unmet_dependency_is_skipped() {
        let scripted = ScriptedActuator::new();
        let step = StepDefinition::with_kind(
            "branch",
            StepKind::Conditional {
                condition: "true".to_string(),
                then_steps: vec![StepDefinition::action("needs-x", "tap").depends_on(["x"])],
                else_steps: vec![],
            },
        );
        let x = StepDefinition::action("x", "tap");
        let (executor, run, mut rx) = setup(&scripted, vec![x, step.clone()]);

        let outcome = executor.execute(&step, &run).await;
        assert!(matches!(outcome, StepOutcome::Completed(_)));
        let skipped = run.step_result("needs-x").unwrap();
        assert_eq!(skipped.status, StepStatus::Skipped);
        assert_eq!(skipped.error.as_deref(), Some(DEPENDENCIES_NOT_MET));
        assert!(
            drain(&mut rx)
                .contains(&(WorkflowEventType::StepSkipped, "needs-x".to_string()))
        );
    }

    #[tokio::test]
    async fn condition_transport_error_fails_attempt() {
        let scripted =
            ScriptedActuator::new().with_transport_error(FIND_ELEMENT_ACTION, "device offline");
        let step = StepDefinition::with_kind(
            "check",
            StepKind::Conditional {
                condition: "element_exists('OK')".to_string(),
                then_steps: vec![],
                else_steps: vec![],
            },
        )
        .retries(1);
        let (executor, run, _rx) = setup(&scripted, vec![step.clone()]);

        // First lookup errors, the retry sees an empty screen and takes `else`.
        let outcome = executor.execute(&step, &run).await;
        let StepOutcome::Completed(payload) = outcome else {
            panic!("retry should succeed");
        };
        assert_eq!(payload["branch"], "else");
        assert_eq!(run.step_result("check").unwrap().attempts, 2);
    }
}
