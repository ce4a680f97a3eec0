//! In-memory `PlanRepository` backed by `DashMap`.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowpilot_types::error::RepositoryError;
use flowpilot_types::plan::Plan;
use uuid::Uuid;

use super::plan::PlanRepository;
use crate::workflow::run_state::RunState;

/// Process-local plan and run store.
///
/// IDs are UUIDv7, so sorting by ID yields creation order.
#[derive(Debug, Default)]
pub struct InMemoryPlanRepository {
    plans: DashMap<Uuid, Arc<Plan>>,
    runs: DashMap<Uuid, Arc<RunState>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanRepository for InMemoryPlanRepository {
    async fn save_plan(&self, plan: Arc<Plan>) -> Result<(), RepositoryError> {
        match self.plans.entry(plan.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "plan {} already stored",
                plan.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(plan);
                Ok(())
            }
        }
    }

    async fn get_plan(&self, id: &Uuid) -> Result<Option<Arc<Plan>>, RepositoryError> {
        Ok(self.plans.get(id).map(|p| Arc::clone(p.value())))
    }

    async fn list_plans(&self) -> Result<Vec<Arc<Plan>>, RepositoryError> {
        let mut plans: Vec<Arc<Plan>> = self.plans.iter().map(|p| Arc::clone(p.value())).collect();
        plans.sort_by_key(|p| p.id);
        Ok(plans)
    }

    async fn save_run(&self, run: Arc<RunState>) -> Result<(), RepositoryError> {
        match self.runs.entry(run.run_id()) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "run {} already stored",
                run.run_id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(run);
                Ok(())
            }
        }
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Arc<RunState>>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|r| Arc::clone(r.value())))
    }

    async fn list_runs(&self, plan_id: &Uuid) -> Result<Vec<Arc<RunState>>, RepositoryError> {
        let mut runs: Vec<Arc<RunState>> = self
            .runs
            .iter()
            .filter(|r| r.plan().id == *plan_id)
            .map(|r| Arc::clone(r.value()))
            .collect();
        runs.sort_by_key(|r| r.run_id());
        Ok(runs)
    }
}
