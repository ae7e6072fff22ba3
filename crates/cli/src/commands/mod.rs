pub mod chat;
pub mod config_cmd;
pub mod serve;
pub mod sessions;

use salesdesk_config::AppConfig;

/// The gateway to talk to: an explicit URL, or the configured host and port.
pub fn gateway_url(url: Option<String>) -> Result<String, Box<dyn std::error::Error>> {
    match url {
        Some(url) => Ok(url),
        None => {
            let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
            Ok(format!(
                "http://{}:{}",
                config.gateway.host, config.gateway.port
            ))
        }
    }
}
