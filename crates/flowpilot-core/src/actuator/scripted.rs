//! Scripted actuator for dry runs and tests.
//!
//! Answers actions from per-action queues of canned outcomes, falling back
//! to a sticky per-action result and finally to plain success. The
//! `find_element` action is answered from a set of "visible" element texts
//! unless it has been scripted explicitly. Every request is recorded.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowpilot_types::action::{ActionRequest, ActionResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Actuator, ActuatorError};

/// Action name used by `element_exists(...)` conditions.
pub const FIND_ELEMENT_ACTION: &str = "find_element";

/// File form of a script, as accepted by `flowpilot run --dry-run --script`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActuatorScript {
    /// Simulated latency applied to every action.
    #[serde(default)]
    pub delay_ms: u64,
    /// Texts that `find_element` reports as present.
    #[serde(default)]
    pub visible_elements: Vec<String>,
    /// One-shot outcomes consumed in order, per action name.
    #[serde(default)]
    pub responses: HashMap<String, Vec<ActionResult>>,
    /// Outcome used once an action's queue is exhausted.
    #[serde(default)]
    pub fallback: HashMap<String, ActionResult>,
}

#[derive(Debug, Clone)]
enum Outcome {
    Result(ActionResult),
    TransportError(String),
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<String, VecDeque<Outcome>>,
    fallback: HashMap<String, ActionResult>,
    visible: HashSet<String>,
}

/// In-memory actuator driven by a script. Clones share state, so a test can
/// keep a handle for assertions after boxing another clone into the engine.
#[derive(Debug, Clone, Default)]
pub struct ScriptedActuator {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<ActionRequest>>>,
    delay: Duration,
}

impl ScriptedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(script: ActuatorScript) -> Self {
        let mut actuator = Self::new().with_delay(Duration::from_millis(script.delay_ms));
        for text in script.visible_elements {
            actuator = actuator.with_visible_element(text);
        }
        for (action, results) in script.responses {
            for result in results {
                actuator = actuator.with_response(action.clone(), result);
            }
        }
        for (action, result) in script.fallback {
            actuator = actuator.with_fallback(action, result);
        }
        actuator
    }

    /// Queue a one-shot outcome for `action`.
    pub fn with_response(self, action: impl Into<String>, result: ActionResult) -> Self {
        self.push(action.into(), Outcome::Result(result));
        self
    }

    /// Queue a one-shot transport failure for `action`.
    pub fn with_transport_error(self, action: impl Into<String>, message: impl Into<String>) -> Self {
        self.push(action.into(), Outcome::TransportError(message.into()));
        self
    }

    /// Result returned for `action` whenever its queue is empty.
    pub fn with_fallback(self, action: impl Into<String>, result: ActionResult) -> Self {
        self.lock_script().fallback.insert(action.into(), result);
        self
    }

    pub fn with_visible_element(self, text: impl Into<String>) -> Self {
        self.show_element(text);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make `text` visible to subsequent `find_element` calls.
    pub fn show_element(&self, text: impl Into<String>) {
        self.lock_script().visible.insert(text.into());
    }

    pub fn hide_element(&self, text: &str) {
        self.lock_script().visible.remove(text);
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<ActionRequest> {
        self.calls.lock().expect("actuator call log lock poisoned").clone()
    }

    /// Number of requests received for `action`.
    pub fn call_count(&self, action: &str) -> usize {
        self.calls
            .lock()
            .expect("actuator call log lock poisoned")
            .iter()
            .filter(|r| r.action == action)
            .count()
    }

    fn push(&self, action: String, outcome: Outcome) {
        self.lock_script()
            .queued
            .entry(action)
            .or_default()
            .push_back(outcome);
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("actuator script lock poisoned")
    }

    fn next_outcome(&self, request: &ActionRequest) -> Outcome {
        let mut script = self.lock_script();
        if let Some(outcome) = script
            .queued
            .get_mut(&request.action)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }
        if let Some(result) = script.fallback.get(&request.action) {
            return Outcome::Result(result.clone());
        }
        if request.action == FIND_ELEMENT_ACTION {
            let text = request
                .params
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let mut payload = Map::new();
            payload.insert("found".into(), Value::Bool(script.visible.contains(text)));
            return Outcome::Result(ActionResult::ok(payload));
        }
        Outcome::Result(ActionResult::ok(Map::new()))
    }
}

impl Actuator for ScriptedActuator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, request: &ActionRequest) -> Result<ActionResult, ActuatorError> {
        self.calls
            .lock()
            .expect("actuator call log lock poisoned")
            .push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_outcome(request) {
            Outcome::Result(result) => Ok(result),
            Outcome::TransportError(message) => Err(ActuatorError::Transport(message)),
        }
    }
}
