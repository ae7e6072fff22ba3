//! Configuration loading, validation, and management for SalesDesk.
//!
//! Loads configuration from `~/.salesdesk/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use salesdesk_core::identity::{Owner, UserDirectory};
use salesdesk_core::metadata::{DEFAULT_END_TAG, DEFAULT_START_TAG, MetadataTags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.salesdesk/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used for chat exchanges
    #[serde(default = "default_model")]
    pub model: String,

    /// Cheaper model used for session titles
    #[serde(default = "default_title_model")]
    pub title_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model step
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// Callers allowed to chat, keyed by bearer token
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserConfig>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_title_model() -> String {
    "claude-3-5-haiku-20241022".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("title_model", &self.title_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("gateway", &self.gateway)
            .field("orchestrator", &self.orchestrator)
            .field("metadata", &self.metadata)
            .field("store", &self.store)
            .field("tools", &self.tools)
            .field("users", &self.users)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Bounds on a single exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum model⇄tool round trips per exchange
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Wall-clock budget per exchange
    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,

    /// Frames buffered between the orchestrator and the response body
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
}

fn default_max_steps() -> usize {
    8
}
fn default_exchange_timeout_secs() -> u64 {
    120
}
fn default_frame_buffer() -> usize {
    1
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            exchange_timeout_secs: default_exchange_timeout_secs(),
            frame_buffer: default_frame_buffer(),
        }
    }
}

impl OrchestratorConfig {
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_start_tag")]
    pub start_tag: String,

    #[serde(default = "default_end_tag")]
    pub end_tag: String,

    /// Prior footers folded into each prompt
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_start_tag() -> String {
    DEFAULT_START_TAG.into()
}
fn default_end_tag() -> String {
    DEFAULT_END_TAG.into()
}
fn default_context_window() -> usize {
    salesdesk_core::DEFAULT_CONTEXT_WINDOW
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            start_tag: default_start_tag(),
            end_tag: default_end_tag(),
            context_window: default_context_window(),
        }
    }
}

impl MetadataConfig {
    pub fn tags(&self) -> MetadataTags {
        MetadataTags::new(&self.start_tag, &self.end_tag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database file; defaults to `~/.salesdesk/salesdesk.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("salesdesk.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Remote tool server; when unset only built-in tools are offered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,

    #[serde(default = "default_tool_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            registry_url: None,
            request_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// One entry of the caller directory.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: i64,
    pub name: String,
    pub token: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "sales_rep".into()
}

impl std::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("token", &"[REDACTED]")
            .field("role", &self.role)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.salesdesk/config.toml).
    ///
    /// Environment overrides:
    /// - `SALESDESK_API_KEY`, then `ANTHROPIC_API_KEY` (only if no key in file)
    /// - `SALESDESK_MODEL`, `SALESDESK_TITLE_MODEL`
    /// - `SALESDESK_TOOLS_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("SALESDESK_API_KEY")
                .ok()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("SALESDESK_MODEL") {
            config.model = model;
        }

        if let Ok(model) = std::env::var("SALESDESK_TITLE_MODEL") {
            config.title_model = model;
        }

        if let Ok(url) = std::env::var("SALESDESK_TOOLS_URL") {
            config.tools.registry_url = Some(url);
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".salesdesk")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 1.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 1.0".into(),
            ));
        }

        if self.orchestrator.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_steps must be at least 1".into(),
            ));
        }

        if self.orchestrator.exchange_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.exchange_timeout_secs must be > 0".into(),
            ));
        }

        if self.orchestrator.frame_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.frame_buffer must be at least 1".into(),
            ));
        }

        if self.metadata.start_tag.is_empty() || self.metadata.end_tag.is_empty() {
            return Err(ConfigError::ValidationError(
                "metadata delimiters must not be empty".into(),
            ));
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown store backend '{}' (expected sqlite or memory)",
                self.store.backend
            )));
        }

        let mut tokens: Vec<&str> = self.users.iter().map(|u| u.token.as_str()).collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::ValidationError("user tokens must not be empty".into()));
        }
        tokens.sort_unstable();
        if tokens.windows(2).any(|w| w[0] == w[1]) {
            return Err(ConfigError::ValidationError("user tokens must be unique".into()));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The caller directory used to resolve bearer tokens.
    pub fn user_directory(&self) -> UserDirectory {
        self.users.iter().fold(UserDirectory::new(), |dir, u| {
            dir.with_user(
                u.token.clone(),
                Owner {
                    id: u.id,
                    name: u.name.clone(),
                    role: u.role.clone(),
                },
            )
        })
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            title_model: default_title_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            gateway: GatewayConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            metadata: MetadataConfig::default(),
            store: StoreConfig::default(),
            tools: ToolsConfig::default(),
            users: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use salesdesk_core::IdentityResolver;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 42618);
        assert_eq!(config.orchestrator.max_steps, 8);
        assert_eq!(config.orchestrator.exchange_timeout(), Duration::from_secs(120));
        assert_eq!(config.metadata.tags(), MetadataTags::default());
        assert_eq!(config.metadata.context_window, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.store.backend, "sqlite");
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_step_cap_rejected() {
        let err = AppConfig::from_toml("[orchestrator]\nmax_steps = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_steps"));
    }

    #[test]
    fn unknown_store_backend_rejected() {
        let err = AppConfig::from_toml("[store]\nbackend = \"redis\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn duplicate_user_tokens_rejected() {
        let toml_str = r#"
[[users]]
id = 1
name = "A"
token = "same"

[[users]]
id = 2
name = "B"
token = "same"
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model, default_model());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "model = \"m\"\n[metadata]\nstart_tag = \"<meta>\"\nend_tag = \"</meta>\"\n",
        )
        .unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "m");
        assert_eq!(config.metadata.tags(), MetadataTags::new("<meta>", "</meta>"));
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[tokio::test]
    async fn user_directory_resolves_configured_tokens() {
        let config = AppConfig::from_toml(
            "[[users]]\nid = 7\nname = \"Dana\"\ntoken = \"tok-7\"\n",
        )
        .unwrap();
        let owner = config.user_directory().resolve("tok-7").await.unwrap();
        assert_eq!(owner.id, 7);
        assert_eq!(owner.role, "sales_rep");
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            users: vec![UserConfig {
                id: 1,
                name: "A".into(),
                token: "tok-secret".into(),
                role: default_role(),
            }],
            ..AppConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(!dbg.contains("tok-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("42618"));
        assert!(toml_str.contains("max_steps"));
    }
}
