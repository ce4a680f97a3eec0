//! Application state wiring the engine to its adapters.
//!
//! AppState holds the engine instance used by both CLI commands and REST API
//! handlers. The engine is generic over its repository; AppState pins it to
//! the in-memory store and picks the actuator at startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use flowpilot_core::actuator::{ActuatorScript, BoxActuator, ScriptedActuator};
use flowpilot_core::repository::InMemoryPlanRepository;
use flowpilot_core::workflow::engine::WorkflowEngine;
use flowpilot_infra::actuator::HttpActuator;
use flowpilot_infra::config::{load_engine_config, resolve_data_dir};
use flowpilot_types::config::EngineConfig;

/// Engine pinned to the concrete repository.
pub type ConcreteEngine = WorkflowEngine<InMemoryPlanRepository>;

/// Where primitive actions go.
#[derive(Debug, Clone)]
pub enum ActuatorSource {
    /// Dry run against a `ScriptedActuator`, optionally loaded from a script file.
    Scripted(Option<PathBuf>),
    /// The device agent at the configured (or overridden) endpoint.
    Http,
}

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load config from the data directory, apply the endpoint override, and
    /// build the engine with the chosen actuator.
    pub async fn init(source: ActuatorSource, endpoint: Option<String>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        let mut config = load_engine_config(&data_dir).await;
        if let Some(endpoint) = endpoint {
            config.actuator.endpoint = Some(endpoint);
        }

        let actuator = build_actuator(&source, &config).await?;
        tracing::debug!(actuator = actuator.name(), data_dir = %data_dir.display(), "state initialized");
        Ok(Self::with_actuator(config, actuator, data_dir))
    }

    pub fn with_actuator(config: EngineConfig, actuator: BoxActuator, data_dir: PathBuf) -> Self {
        let engine = WorkflowEngine::new(InMemoryPlanRepository::new(), actuator, &config);
        Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
            data_dir,
        }
    }
}

async fn build_actuator(source: &ActuatorSource, config: &EngineConfig) -> anyhow::Result<BoxActuator> {
    match source {
        ActuatorSource::Scripted(None) => Ok(BoxActuator::new(ScriptedActuator::new())),
        ActuatorSource::Scripted(Some(path)) => {
            let script = load_script(path).await?;
            Ok(BoxActuator::new(ScriptedActuator::from_script(script)))
        }
        ActuatorSource::Http => {
            let actuator = HttpActuator::from_config(&config.actuator)?;
            Ok(BoxActuator::new(actuator))
        }
    }
}

/// Read an actuator script. YAML parsing also accepts JSON documents.
pub async fn load_script(path: &Path) -> anyhow::Result<ActuatorScript> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read script {}", path.display()))?;
    serde_yaml_ng::from_str(&content)
        .with_context(|| format!("failed to parse script {}", path.display()))
}
