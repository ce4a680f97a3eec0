//! `WorkflowEngine`: the plan submission and run control surface.
//!
//! Validates and stores plans, spawns one scheduler task per run, and
//! exposes pause/resume/cancel as compare-and-swap transitions on the run's
//! status. Storage goes through an injected `PlanRepository`.

use std::sync::Arc;

use flowpilot_types::config::EngineConfig;
use flowpilot_types::error::RepositoryError;
use flowpilot_types::event::{WorkflowEvent, WorkflowEventType};
use flowpilot_types::plan::{Plan, PlanDefinition, PlanSummary};
use flowpilot_types::run::{RunSnapshot, RunStatus};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::definition::{PlanError, validate_plan};
use super::finalize::{ActionFinalizer, SummaryFinalizer};
use super::generator::PlanGenerator;
use super::lint::lint_plan;
use super::run_state::RunState;
use super::scheduler::RunScheduler;
use super::step_executor::StepExecutor;
use crate::actuator::BoxActuator;
use crate::event::EventBus;
use crate::repository::PlanRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error("plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("cannot {action} run {run_id}: run is {status}")]
    InvalidTransition {
        run_id: Uuid,
        action: &'static str,
        status: RunStatus,
    },

    #[error("plan generation failed: {0}")]
    Generator(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

pub struct WorkflowEngine<R: PlanRepository> {
    repository: Arc<R>,
    event_bus: EventBus,
    scheduler: Arc<RunScheduler>,
}

impl<R: PlanRepository + 'static> WorkflowEngine<R> {
    /// Build an engine over `repository`, driving devices through `actuator`.
    ///
    /// The finalizer chain is the configured `finalize_action` (if any)
    /// followed by the run summary.
    pub fn new(repository: R, actuator: BoxActuator, config: &EngineConfig) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let executor = Arc::new(StepExecutor::new(
            actuator.clone(),
            event_bus.clone(),
            config,
        ));

        let mut scheduler = RunScheduler::new(executor, event_bus.clone());
        if let Some(action) = &config.finalize_action {
            scheduler = scheduler.with_finalizer(ActionFinalizer::new(actuator, action.clone()));
        }
        scheduler = scheduler.with_finalizer(SummaryFinalizer);

        Self {
            repository: Arc::new(repository),
            event_bus,
            scheduler: Arc::new(scheduler),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_bus.subscribe()
    }

    // -----------------------------------------------------------------------
    // Plans
    // -----------------------------------------------------------------------

    /// Validate and store a plan. Returns its ID.
    pub async fn create_plan(&self, definition: PlanDefinition) -> Result<Uuid, EngineError> {
        validate_plan(&definition)?;
        for lint in lint_plan(&definition) {
            tracing::warn!(plan = %definition.name, "{lint}");
        }
        let plan = Arc::new(Plan::new(definition));
        self.repository.save_plan(Arc::clone(&plan)).await?;

        tracing::info!(plan_id = %plan.id, name = plan.name(), steps = plan.steps().len(), "plan created");
        self.event_bus.publish(WorkflowEvent::plan(
            WorkflowEventType::WorkflowCreated,
            plan.id,
            json!({ "name": plan.name(), "step_count": plan.steps().len() }),
        ));
        Ok(plan.id)
    }

    /// Ask `generator` for a plan that fulfils `objective`, then create it.
    pub async fn create_plan_from_objective(
        &self,
        objective: &str,
        generator: &impl PlanGenerator,
    ) -> Result<Uuid, EngineError> {
        let mut definition = generator
            .generate(objective)
            .await
            .map_err(|e| EngineError::Generator(e.to_string()))?;
        if definition.objective.is_none() {
            definition.objective = Some(objective.to_string());
        }
        self.create_plan(definition).await
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> Result<Arc<Plan>, EngineError> {
        self.repository
            .get_plan(&plan_id)
            .await?
            .ok_or(EngineError::PlanNotFound(plan_id))
    }

    /// Summaries of every stored plan, oldest first.
    pub async fn list(&self) -> Result<Vec<PlanSummary>, EngineError> {
        let plans = self.repository.list_plans().await?;
        let mut summaries = Vec::with_capacity(plans.len());
        for plan in plans {
            let runs = self.repository.list_runs(&plan.id).await?;
            summaries.push(plan.summary(runs.len()));
        }
        Ok(summaries)
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Start a run of `plan_id` with the given initial context.
    ///
    /// The run is already `Running` when this returns; the steps execute on
    /// a spawned task.
    pub async fn execute(
        &self,
        plan_id: Uuid,
        context: Map<String, Value>,
    ) -> Result<Uuid, EngineError> {
        let plan = self.get_plan(plan_id).await?;
        let run = Arc::new(RunState::new(plan, context));
        let run_id = run.run_id();
        self.repository.save_run(Arc::clone(&run)).await?;

        self.scheduler.begin(&run);
        let scheduler = Arc::clone(&self.scheduler);
        tokio::spawn(async move {
            let status = scheduler.run(&run).await;
            tracing::debug!(run_id = %run.run_id(), %status, "run task finished");
        });

        Ok(run_id)
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Arc<RunState>, EngineError> {
        self.repository
            .get_run(&run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))
    }

    /// Request a pause at the next step boundary.
    pub async fn pause(&self, run_id: Uuid) -> Result<(), EngineError> {
        self.control(
            run_id,
            "pause",
            &[RunStatus::Running],
            RunStatus::Paused,
            WorkflowEventType::ExecutionPaused,
        )
        .await
    }

    pub async fn resume(&self, run_id: Uuid) -> Result<(), EngineError> {
        self.control(
            run_id,
            "resume",
            &[RunStatus::Paused],
            RunStatus::Running,
            WorkflowEventType::ExecutionResumed,
        )
        .await
    }

    /// Stop the run at the next step boundary. An in-flight step finishes,
    /// remaining steps stay `Pending`.
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), EngineError> {
        self.control(
            run_id,
            "cancel",
            &[RunStatus::Pending, RunStatus::Running, RunStatus::Paused],
            RunStatus::Cancelled,
            WorkflowEventType::ExecutionCancelled,
        )
        .await
    }

    async fn control(
        &self,
        run_id: Uuid,
        action: &'static str,
        from: &[RunStatus],
        to: RunStatus,
        event_type: WorkflowEventType,
    ) -> Result<(), EngineError> {
        let run = self.get_run(run_id).await?;
        match run.transition(from, to) {
            Ok(previous) => {
                tracing::info!(run_id = %run_id, %previous, %to, "run {action} requested");
                run.emit(
                    &self.event_bus,
                    event_type,
                    None,
                    json!({ "previous_status": previous }),
                );
                Ok(())
            }
            Err(status) => Err(EngineError::InvalidTransition {
                run_id,
                action,
                status,
            }),
        }
    }

    /// Point-in-time copy of a run.
    pub async fn status(&self, run_id: Uuid) -> Result<RunSnapshot, EngineError> {
        Ok(self.get_run(run_id).await?.snapshot())
    }

    /// Snapshots of every run of `plan_id`, oldest first.
    pub async fn list_runs(&self, plan_id: Uuid) -> Result<Vec<RunSnapshot>, EngineError> {
        self.get_plan(plan_id).await?;
        let runs = self.repository.list_runs(&plan_id).await?;
        Ok(runs.iter().map(|r| r.snapshot()).collect())
    }

    /// Wait until the run's task is done (terminal status, finalizers run).
    ///
    /// A paused run does not finish until it is resumed or cancelled.
    pub async fn wait(&self, run_id: Uuid) -> Result<RunSnapshot, EngineError> {
        let run = self.get_run(run_id).await?;
        run.wait_finished().await;
        Ok(run.snapshot())
    }
}

impl<R: PlanRepository> std::fmt::Debug for WorkflowEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("event_bus", &self.event_bus)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
