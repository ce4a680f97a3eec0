//! Plan generator port.
//!
//! Turning a natural-language objective into steps happens outside the
//! engine. Implementations (LLM prompting, per-app recipe tables) plug in
//! here and hand back an ordinary `PlanDefinition`, which the engine then
//! validates like any other submission.

use flowpilot_types::plan::PlanDefinition;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct GeneratorError(pub String);

/// Produces a plan for an objective.
///
/// Uses native async fn in traits (RPITIT).
pub trait PlanGenerator: Send + Sync {
    fn generate(
        &self,
        objective: &str,
    ) -> impl std::future::Future<Output = Result<PlanDefinition, GeneratorError>> + Send;
}
