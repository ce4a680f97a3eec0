//! HttpActuator: drives a device agent over JSON/HTTP.
//!
//! Every primitive action is a `POST {endpoint}/actions` carrying the
//! serialized [`ActionRequest`] (`action`, `params`, `timeout_ms`). The agent
//! answers with an [`ActionResult`] body. A step timeout is forwarded as
//! `timeout_ms` for the agent to enforce; the client-side timeout here only
//! bounds the transport.

use std::time::Duration;

use flowpilot_core::actuator::{Actuator, ActuatorError};
use flowpilot_types::action::{ActionRequest, ActionResult};
use flowpilot_types::config::ActuatorConfig;

use crate::config::ConfigError;

pub struct HttpActuator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpActuator {
    /// Create an actuator for the agent at `endpoint` (e.g. `http://127.0.0.1:7420`).
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, ConfigError> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint(endpoint));
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Build from the `[actuator]` config table.
    pub fn from_config(config: &ActuatorConfig) -> Result<Self, ConfigError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or(ConfigError::MissingEndpoint)?;
        Self::new(endpoint, Duration::from_secs(config.request_timeout_secs))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn actions_url(&self) -> String {
        format!("{}/actions", self.endpoint)
    }
}

impl std::fmt::Debug for HttpActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpActuator")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Actuator for HttpActuator {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, request: &ActionRequest) -> Result<ActionResult, ActuatorError> {
        tracing::debug!(action = %request.action, endpoint = %self.endpoint, "dispatching action");

        let response = self
            .client
            .post(self.actions_url())
            .json(request)
            .send()
            .await
            .map_err(|e| ActuatorError::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                503 => ActuatorError::Unavailable(error_body),
                _ => ActuatorError::Transport(format!("HTTP {status}: {error_body}")),
            });
        }

        response
            .json::<ActionResult>()
            .await
            .map_err(|e| ActuatorError::InvalidResponse(format!("failed to parse response: {e}")))
    }
}
