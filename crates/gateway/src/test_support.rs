//! Shared fixtures for the gateway's HTTP tests.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use http_body_util::BodyExt;
use salesdesk_agent::test_helpers::{ScriptedProvider, Step};
use salesdesk_agent::{Orchestrator, TitleGenerator};
use salesdesk_core::error::ToolError;
use salesdesk_core::identity::{Owner, UserDirectory};
use salesdesk_core::metadata::MetadataTags;
use salesdesk_core::tool::{ToolProvider, ToolRegistry};
use salesdesk_store::InMemoryStore;
use salesdesk_tools::StaticToolProvider;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::{AppState, SharedState};

/// A tool source whose server is down.
pub struct FailingTools;

#[async_trait]
impl ToolProvider for FailingTools {
    async fn registry(&self) -> Result<ToolRegistry, ToolError> {
        Err(ToolError::RegistryUnavailable("connection refused".into()))
    }
}

pub fn scripted_state(steps: Vec<Step>) -> (SharedState, Arc<ScriptedProvider>) {
    scripted_state_with_tools(steps, Arc::new(StaticToolProvider::new()))
}

/// State with an in-memory store, one known rep (`rep-token`, id 7) and
/// another (`other-token`, id 8).
pub fn scripted_state_with_tools(
    steps: Vec<Step>,
    tools: Arc<dyn ToolProvider>,
) -> (SharedState, Arc<ScriptedProvider>) {
    let provider = Arc::new(ScriptedProvider::new(steps).with_title("MegaMart Account Review"));
    (state_for(provider.clone(), tools), provider)
}

/// State around an already configured provider.
pub fn state_for(provider: Arc<ScriptedProvider>, tools: Arc<dyn ToolProvider>) -> SharedState {
    let users = UserDirectory::new()
        .with_user(
            "rep-token",
            Owner {
                id: 7,
                name: "Dana Reyes".into(),
                role: "sales_rep".into(),
            },
        )
        .with_user(
            "other-token",
            Owner {
                id: 8,
                name: "Sam Ortiz".into(),
                role: "sales_rep".into(),
            },
        );

    let state = AppState {
        store: Arc::new(InMemoryStore::new()),
        identity: Arc::new(users),
        tools,
        orchestrator: Orchestrator::new(provider.clone(), "test-model"),
        titles: TitleGenerator::new(provider.clone(), "title-model"),
        tags: MetadataTags::default(),
        context_window: 3,
        frame_buffer: 1,
    };
    Arc::new(state)
}

pub fn with_max_steps(state: SharedState, max_steps: usize) -> SharedState {
    let mut inner = (*state).clone();
    inner.orchestrator = inner.orchestrator.with_max_steps(max_steps);
    Arc::new(inner)
}

pub fn with_timeout(state: SharedState, budget: Duration) -> SharedState {
    let mut inner = (*state).clone();
    inner.orchestrator = inner.orchestrator.with_timeout(budget);
    Arc::new(inner)
}

pub fn chat_request(token: &str, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json");
    if !token.is_empty() {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

/// Collect the whole body and split it into lines.
pub async fn body_lines(response: Response) -> Vec<String> {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

pub async fn body_json<T: DeserializeOwned>(response: Response) -> T {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}
