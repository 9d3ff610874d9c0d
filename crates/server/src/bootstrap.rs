use std::sync::Arc;

use nova_agent::AssistantRuntime;
use nova_core::config::{AppConfig, ConfigError};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<AssistantRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("assistant runtime initialization failed: {0:#}")]
    Runtime(anyhow::Error),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let runtime = AssistantRuntime::from_config(&config).map_err(BootstrapError::Runtime)?;
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        data_tools = runtime.tool_registry().len(),
        vector_index = config.retrieval.vector_index_url.is_some(),
        "assistant runtime assembled"
    );

    Ok(Application { config, runtime: Arc::new(runtime) })
}
