//! Wiring from [`ColloquyConfig`] to a ready-to-use driver.

use anyhow::Context;

use colloquy_config::{BackendConfig, ColloquyConfig};
use colloquy_context::{ModelLimits, ModelRegistry, SqliteSessionStore, TokenCounter};
use colloquy_providers::openai::{OpenAIBackend, OpenAIBackendConfig};

use crate::driver::CompletionDriver;

/// Driver backed by SQLite, the Chat Completions API and tiktoken.
pub type ConfiguredDriver = CompletionDriver<SqliteSessionStore, OpenAIBackend, TokenCounter>;

pub fn driver_from_config(config: &ColloquyConfig) -> anyhow::Result<ConfiguredDriver> {
    let store_path = config
        .store_path()
        .context("no [store] path configured and no home directory to default to")?;
    let store = SqliteSessionStore::open(&store_path)
        .with_context(|| format!("failed to open session store at {}", store_path.display()))?;

    let default_backend = BackendConfig::default();
    let backend_config = config.backend.as_ref().unwrap_or(&default_backend);
    let api_key = backend_config
        .resolved_api_key()
        .context("no API key: set [backend] api_key or OPENAI_API_KEY")?;
    let mut openai =
        OpenAIBackendConfig::new(api_key).with_idle_timeout(backend_config.idle_timeout());
    if let Some(base_url) = &backend_config.base_url {
        openai = openai.with_base_url(base_url.clone());
    }
    let backend = OpenAIBackend::new(openai).context("failed to build generation backend")?;

    tracing::info!(
        store = %store_path.display(),
        endpoint = backend.endpoint(),
        "Completion driver ready"
    );
    Ok(CompletionDriver::new(store, backend, TokenCounter::new())
        .with_registry(registry_from_config(config)))
}

/// Known-model defaults plus the `[models."name"]` overrides.
#[must_use]
pub fn registry_from_config(config: &ColloquyConfig) -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    for (model, limits) in &config.models {
        registry.set_override(
            model.clone(),
            ModelLimits::new(limits.context_window, limits.max_output),
        );
    }
    registry
}
