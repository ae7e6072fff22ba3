//! `salesdesk serve`: start the chat gateway.

use salesdesk_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        return Err("No API key found. Set SALESDESK_API_KEY or ANTHROPIC_API_KEY.".into());
    }

    println!("SalesDesk gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model);
    println!("   Store:     {}", config.store.backend);
    println!("   Users:     {}", config.users.len());

    salesdesk_gateway::start(config).await?;

    Ok(())
}
