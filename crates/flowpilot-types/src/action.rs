//! Actuator request/response types.
//!
//! The engine forwards primitive actions verbatim: an action name plus a
//! parameter map. The actuator reports success, a payload, and an optional
//! error message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single primitive action to perform against the device/UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Actuator-facing action name (e.g. `tap`, `type_text`, `launch_app`).
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Advisory deadline for this attempt. The actuator enforces it itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            params,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Outcome reported by the actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(payload: Map<String, Value>) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Map::new(),
            error: Some(error.into()),
        }
    }
}
