//! Tool registry providers for SalesDesk.
//!
//! The orchestrator asks a [`ToolProvider`] for a fresh registry at the start
//! of every exchange. Two sources are available:
//!
//! - [`StaticToolProvider`]: tools compiled into the process
//! - [`RemoteToolProvider`]: a remote tool server queried per request

pub mod remote;
pub mod static_provider;

pub use remote::RemoteToolProvider;
pub use static_provider::StaticToolProvider;

use salesdesk_config::AppConfig;
use salesdesk_core::error::ToolError;
use salesdesk_core::tool::ToolProvider;
use std::sync::Arc;
use std::time::Duration;

/// Build the configured tool provider.
///
/// Without `tools.registry_url` the model is offered no tools.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn ToolProvider>, ToolError> {
    match &config.tools.registry_url {
        Some(url) => {
            let timeout = Duration::from_secs(config.tools.request_timeout_secs);
            Ok(Arc::new(RemoteToolProvider::new(url.clone(), timeout)?))
        }
        None => Ok(Arc::new(StaticToolProvider::new())),
    }
}
