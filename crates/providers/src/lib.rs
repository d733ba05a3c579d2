//! Model provider implementations for agentloop.
//!
//! All providers implement the `agentloop_core::Provider` trait.
//! [`from_config`] builds the provider named by the configuration.

pub mod anthropic;

pub use anthropic::AnthropicProvider;

use agentloop_config::AppConfig;
use agentloop_core::error::ProviderError;
use agentloop_core::Provider;
use std::sync::Arc;

/// Build the configured provider.
///
/// Fails with `NotConfigured` when no API key is available from the config
/// file or the environment.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "no API key; set api_key in config.toml or AGENTLOOP_API_KEY".into(),
        )
    })?;

    let mut provider = AnthropicProvider::new(api_key)?;
    if let Some(url) = &config.api_url {
        provider = provider.with_base_url(url);
    }

    tracing::debug!(provider = provider.name(), "Provider configured");
    Ok(Arc::new(provider))
}
