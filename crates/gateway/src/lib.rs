//! HTTP gateway for SalesDesk.
//!
//! Exposes the chat streaming endpoint, the session read endpoints used by
//! the sidebar, and a health check. Built on Axum.
//!
//! - `GET  /health`               liveness, unauthenticated
//! - `POST /chat`                 run one exchange, stream frames
//! - `GET  /chat/sessions`        the caller's sessions
//! - `GET  /chat/sessions/{id}`   one session with its messages

pub mod auth;
pub mod chat;
pub mod error;
pub mod multiplexer;
pub mod sessions;

#[cfg(test)]
mod test_support;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, header};
use axum::{
    Router,
    response::Json,
    routing::{get, post},
};
use salesdesk_agent::{Orchestrator, TitleGenerator};
use salesdesk_config::AppConfig;
use salesdesk_core::identity::IdentityResolver;
use salesdesk_core::metadata::MetadataTags;
use salesdesk_core::provider::Provider;
use salesdesk_core::session::SessionStore;
use salesdesk_core::tool::ToolProvider;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared application state for the gateway.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub identity: Arc<dyn IdentityResolver>,
    pub tools: Arc<dyn ToolProvider>,
    pub orchestrator: Orchestrator,
    pub titles: TitleGenerator,
    pub tags: MetadataTags,
    pub context_window: usize,
    pub frame_buffer: usize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the collaborators together using the configured models and limits.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolProvider>,
    ) -> Self {
        Self {
            store,
            identity: Arc::new(config.user_directory()),
            tools,
            orchestrator: Orchestrator::from_config(Arc::clone(&provider), config),
            titles: TitleGenerator::new(provider, config.title_model.clone()),
            tags: config.metadata.tags(),
            context_window: config.metadata.context_window,
            frame_buffer: config.orchestrator.frame_buffer,
        }
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat::chat_handler))
        .route("/chat/sessions", get(sessions::list_sessions_handler))
        .route("/chat/sessions/{id}", get(sessions::get_session_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Open the configured session store.
pub async fn open_store(
    config: &AppConfig,
) -> Result<Arc<dyn SessionStore>, salesdesk_core::error::StoreError> {
    match config.store.backend.as_str() {
        "memory" => Ok(Arc::new(salesdesk_store::InMemoryStore::new())),
        _ => {
            let path = config.store.database_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    salesdesk_core::error::StoreError::Storage(format!(
                        "cannot create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            let store = salesdesk_store::SqliteStore::new(&path.to_string_lossy()).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Start the gateway HTTP server.
///
/// Builds the provider, tool source and store once and shares them across
/// requests.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = salesdesk_providers::build_from_config(&config)?;
    let tools = salesdesk_tools::build_from_config(&config)?;
    let store = open_store(&config).await?;

    if config.users.is_empty() {
        tracing::warn!("No users configured; every chat request will be rejected");
    }

    let state = Arc::new(AppState::from_config(&config, store.clone(), provider, tools));
    let app = build_router(state);

    info!(
        addr = %addr,
        store = store.name(),
        model = %config.model,
        max_steps = config.orchestrator.max_steps,
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
