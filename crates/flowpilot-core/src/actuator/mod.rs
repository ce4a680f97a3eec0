//! Actuator port: the engine's only channel to the device or UI.
//!
//! The engine never interprets primitive actions. It forwards an
//! `ActionRequest` and reads back an `ActionResult`. Concrete actuators live
//! in `flowpilot-infra` (HTTP device agent) or here (`ScriptedActuator` for
//! dry runs and tests).

pub mod box_actuator;
pub mod scripted;

use flowpilot_types::action::{ActionRequest, ActionResult};
use thiserror::Error;

pub use box_actuator::BoxActuator;
pub use scripted::{ActuatorScript, ScriptedActuator};

/// Transport-level failure talking to an actuator.
///
/// An action that ran and reported `success: false` is NOT an
/// `ActuatorError`; it comes back as an `ActionResult`.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("actuator unavailable: {0}")]
    Unavailable(String),
}

/// Something that can perform primitive actions.
///
/// Uses native async fn in traits (RPITIT). Wrap implementations in
/// [`BoxActuator`] for dynamic dispatch.
pub trait Actuator: Send + Sync {
    /// Short name used in logs (e.g. "http", "scripted").
    fn name(&self) -> &str;

    /// Perform one action attempt.
    fn execute(
        &self,
        request: &ActionRequest,
    ) -> impl std::future::Future<Output = Result<ActionResult, ActuatorError>> + Send;
}
