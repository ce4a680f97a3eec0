//! Engine configuration loader for flowpilot.
//!
//! Reads `config.toml` from the data directory (`~/.flowpilot/` by default)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use flowpilot_types::config::EngineConfig;
use thiserror::Error;

/// Name of the config file inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration that is present but unusable for the requested operation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no actuator endpoint configured (set [actuator] endpoint or pass --endpoint)")]
    MissingEndpoint,

    #[error("invalid actuator endpoint '{0}': must start with http:// or https://")]
    InvalidEndpoint(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `FLOWPILOT_DATA_DIR` environment variable
/// 2. `~/.flowpilot`
/// 3. `./.flowpilot`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FLOWPILOT_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".flowpilot");
    }

    PathBuf::from(".flowpilot")
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.retry_backoff_base_ms, 2000);
        assert_eq!(config.server.port, 7410);
        assert!(config.actuator.endpoint.is_none());
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
retry_backoff_base_ms = 500
finalize_action = "stop_recording"

[actuator]
endpoint = "http://127.0.0.1:7420"

[server]
port = 9000
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.retry_backoff_base_ms, 500);
        assert_eq!(config.finalize_action.as_deref(), Some("stop_recording"));
        assert_eq!(
            config.actuator.endpoint.as_deref(),
            Some("http://127.0.0.1:7420")
        );
        assert_eq!(config.actuator.request_timeout_secs, 30);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.event_bus_capacity, 1024);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.retry_backoff_base_ms, 2000);
        assert!(config.finalize_action.is_none());
    }

    #[test]
    fn resolve_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var("FLOWPILOT_DATA_DIR", "/tmp/test-flowpilot");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-flowpilot"));
        unsafe {
            std::env::remove_var("FLOWPILOT_DATA_DIR");
        }
    }
}
