//! Model provider adapters for SalesDesk.
//!
//! Every adapter implements `salesdesk_core::Provider`; vendor wire formats
//! stay inside this crate.

pub mod anthropic;

pub use anthropic::{AnthropicProvider, SseDecoder};

use salesdesk_config::AppConfig;
use salesdesk_core::error::ProviderError;
use salesdesk_core::provider::Provider;
use std::sync::Arc;

/// Build the configured provider.
///
/// `SALESDESK_PROVIDER_URL` overrides the API base URL (proxies, local mocks).
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "no API key: set api_key in ~/.salesdesk/config.toml or SALESDESK_API_KEY".into(),
        )
    })?;

    let mut provider = AnthropicProvider::new(api_key)?;
    if let Ok(url) = std::env::var("SALESDESK_PROVIDER_URL") {
        provider = provider.with_base_url(url);
    }

    Ok(Arc::new(provider))
}
