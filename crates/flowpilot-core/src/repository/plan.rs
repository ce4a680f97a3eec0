//! Plan/run repository trait definition.

use std::sync::Arc;

use flowpilot_types::error::RepositoryError;
use flowpilot_types::plan::Plan;
use uuid::Uuid;

use crate::workflow::run_state::RunState;

/// Repository trait for plans and the runs started from them.
///
/// Plans are immutable once saved and shared by reference. Runs are stored
/// as live `RunState` handles so status queries observe the scheduler's
/// progress without copying.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait PlanRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Plans
    // -----------------------------------------------------------------------

    /// Store a new plan. Fails with `Conflict` if the ID is already taken.
    fn save_plan(
        &self,
        plan: Arc<Plan>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_plan(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Arc<Plan>>, RepositoryError>> + Send;

    /// All plans, oldest first.
    fn list_plans(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Arc<Plan>>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Register a run. Fails with `Conflict` if the ID is already taken.
    fn save_run(
        &self,
        run: Arc<RunState>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Arc<RunState>>, RepositoryError>> + Send;

    /// Runs started from `plan_id`, oldest first.
    fn list_runs(
        &self,
        plan_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Arc<RunState>>, RepositoryError>> + Send;
}
