//! Engine configuration types for flowpilot.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls the
//! event bus, retry backoff, loop bounds, the actuator endpoint, and the
//! API server. All fields have sensible defaults.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the workflow engine.
///
/// Loaded from `~/.flowpilot/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Buffered events per subscriber before a slow subscriber starts lagging.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Retry delay unit. The wait before re-attempt `n` is `base * n`.
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,

    /// Iteration bound for loops that do not set `max_iterations`.
    #[serde(default = "default_loop_max_iterations")]
    pub default_loop_max_iterations: u32,

    /// Actuator action issued after every run to stop ambient recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize_action: Option<String>,

    #[serde(default)]
    pub actuator: ActuatorConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_retry_backoff_base_ms() -> u64 {
    2000
}

fn default_loop_max_iterations() -> u32 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            default_loop_max_iterations: default_loop_max_iterations(),
            finalize_action: None,
            actuator: ActuatorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Where the device actuator lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// Base URL of the device agent (e.g. `http://127.0.0.1:7420`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Transport-level timeout for a single actuator request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// REST/WebSocket server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7410
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.event_bus_capacity, 1024);
        assert_eq!(config.retry_backoff_base_ms, 2000);
        assert_eq!(config.default_loop_max_iterations, 100);
        assert!(config.finalize_action.is_none());
        assert_eq!(config.server.port, 7410);
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.retry_backoff_base_ms, 2000);
        assert_eq!(config.actuator.request_timeout_secs, 30);
        assert!(config.actuator.endpoint.is_none());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
retry_backoff_base_ms = 500
finalize_action = "stop_recording"

[actuator]
endpoint = "http://10.0.0.5:7420"

[server]
port = 9000
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry_backoff_base_ms, 500);
        assert_eq!(config.finalize_action.as_deref(), Some("stop_recording"));
        assert_eq!(
            config.actuator.endpoint.as_deref(),
            Some("http://10.0.0.5:7420")
        );
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
    }
}
