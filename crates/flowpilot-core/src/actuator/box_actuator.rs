//! BoxActuator -- object-safe dynamic dispatch wrapper for `Actuator`.
//!
//! Same blanket-impl pattern as the other boxed ports:
//! 1. Define an object-safe `ActuatorDyn` trait with boxed futures
//! 2. Blanket-impl `ActuatorDyn` for all `T: Actuator`
//! 3. `BoxActuator` wraps `Arc<dyn ActuatorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowpilot_types::action::{ActionRequest, ActionResult};

use super::{Actuator, ActuatorError};

/// Object-safe version of [`Actuator`] with boxed futures.
pub trait ActuatorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        request: &'a ActionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ActionResult, ActuatorError>> + Send + 'a>>;
}

impl<T: Actuator> ActuatorDyn for T {
    fn name(&self) -> &str {
        Actuator::name(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        request: &'a ActionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ActionResult, ActuatorError>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

/// Type-erased, cheaply cloneable actuator.
///
/// The step executor, condition evaluator and finalizers all hold a clone,
/// so the inner actuator sits behind an `Arc` rather than a `Box`.
#[derive(Clone)]
pub struct BoxActuator {
    inner: Arc<dyn ActuatorDyn>,
}

impl BoxActuator {
    pub fn new<T: Actuator + 'static>(actuator: T) -> Self {
        Self {
            inner: Arc::new(actuator),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn execute(&self, request: &ActionRequest) -> Result<ActionResult, ActuatorError> {
        self.inner.execute_boxed(request).await
    }
}

impl std::fmt::Debug for BoxActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxActuator")
            .field("name", &self.inner.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    struct EchoActuator;

    impl Actuator for EchoActuator {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, request: &ActionRequest) -> Result<ActionResult, ActuatorError> {
            let mut payload = Map::new();
            payload.insert("action".into(), json!(request.action));
            Ok(ActionResult::ok(payload))
        }
    }

    #[tokio::test]
    async fn box_actuator_delegates_to_inner() {
        let actuator = BoxActuator::new(EchoActuator);
        assert_eq!(actuator.name(), "echo");

        let result = actuator
            .execute(&ActionRequest::new("tap", Map::new()))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.payload["action"], "tap");
    }

    #[test]
    fn clones_share_the_same_actuator() {
        let a = BoxActuator::new(EchoActuator);
        let b = a.clone();
        assert_eq!(a.name(), b.name());
        assert!(format!("{b:?}").contains("echo"));
    }
}
