//! `POST /chat`: one exchange, streamed as frames.
//!
//! Everything that can fail with a status code happens before the response
//! is returned: caller identity, the tool registry fetch, session
//! resolution and the user-message write. After that the status line is
//! committed and failures travel in-band as a single `error` frame.
//!
//! Frame order on the wire:
//!
//! ```text
//! status → delta* → (metadata | error)?  → close
//! ```

use axum::extract::{Json, State};
use axum::response::Response;
use chrono::Utc;
use salesdesk_agent::{ExchangeEvent, ExchangeRequest, ExchangeStatus, system_prompt, user_turn};
use salesdesk_core::context::build_context;
use salesdesk_core::error::ExchangeError;
use salesdesk_core::frame::Frame;
use salesdesk_core::identity::Owner;
use salesdesk_core::session::{NewMessage, Session, SessionId};
use salesdesk_core::tool::ToolRegistry;
use serde::Deserialize;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::SharedState;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::multiplexer::{FrameSink, frame_channel};

/// Body of `POST /chat`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Context the client assembled itself; used only for sessions with no
    /// stored footers yet.
    #[serde(default)]
    pub context: Option<String>,
}

/// Everything an exchange needs once the stream has started.
struct PreparedExchange {
    session: Session,
    registry: ToolRegistry,
    request: ExchangeRequest,
}

pub async fn chat_handler(
    State(state): State<SharedState>,
    Caller(owner): Caller,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let prepared = prepare(&state, &owner, payload).await?;
    info!(
        session_id = prepared.session.id,
        owner_id = owner.id,
        tools = prepared.registry.len(),
        "Starting chat exchange"
    );

    let (sink, response) = frame_channel(state.frame_buffer);
    tokio::spawn(stream_exchange(state, prepared, sink));
    Ok(response)
}

async fn prepare(
    state: &SharedState,
    owner: &Owner,
    payload: ChatRequest,
) -> Result<PreparedExchange, ExchangeError> {
    let registry = state.tools.registry().await.map_err(|e| {
        warn!(error = %e, "Tool registry unavailable, refusing exchange");
        ExchangeError::from(e)
    })?;

    let session = state
        .store
        .resolve_session(payload.session_id, owner.id)
        .await?;

    let history = state.store.list_messages(session.id).await?;
    let mut context = build_context(&history, state.context_window);
    if context.is_empty() {
        context = payload.context.clone().unwrap_or_default();
    }

    state
        .store
        .append_message(
            session.id,
            NewMessage::user(payload.message.clone(), payload.context),
        )
        .await?;

    let request = ExchangeRequest {
        system_prompt: system_prompt(owner, &state.tags, Utc::now()),
        user_turn: user_turn(&context, &payload.message),
    };

    Ok(PreparedExchange {
        session,
        registry,
        request,
    })
}

/// Drive one exchange from the status frame to stream close.
async fn stream_exchange(state: SharedState, prepared: PreparedExchange, sink: FrameSink) {
    let session_id = prepared.session.id;
    let started = Instant::now();
    if sink.send(Frame::status(session_id)).await.is_err() {
        info!(session_id, "Client left before the exchange started");
        return;
    }

    let mut events = state
        .orchestrator
        .run_exchange(prepared.request, prepared.registry);
    let mut text = String::new();
    let mut finished = None;

    loop {
        let event = tokio::select! {
            _ = sink.closed() => {
                info!(session_id, "Client disconnected, cancelling exchange");
                return;
            }
            event = events.recv() => event,
        };
        let Some(event) = event else { break };
        match event {
            ExchangeEvent::Delta { content } => {
                text.push_str(&content);
                if sink.send(Frame::delta(content)).await.is_err() {
                    info!(session_id, "Client disconnected, cancelling exchange");
                    return;
                }
            }
            ExchangeEvent::ToolCall { name, .. } => {
                debug!(session_id, tool = %name, "Model requested tool");
            }
            ExchangeEvent::ToolResult { name, success, .. } => {
                debug!(session_id, tool = %name, success, "Tool returned");
            }
            ExchangeEvent::Done {
                status,
                steps,
                tool_calls_made,
                ..
            } => {
                finished = Some((status, steps, tool_calls_made));
            }
            ExchangeEvent::Error { message } => {
                warn!(session_id, error = %message, "Exchange failed mid-stream");
                let _ = sink.send(Frame::error(message)).await;
                return;
            }
        }
    }

    let Some((status, steps, tool_calls)) = finished else {
        warn!(session_id, "Exchange ended without an outcome");
        let _ = sink.send(Frame::error("exchange ended unexpectedly")).await;
        return;
    };
    if status == ExchangeStatus::StepCapReached {
        warn!(session_id, steps, "Exchange hit the step cap, keeping partial answer");
    }

    let metadata = state.tags.extract(&text).map(str::to_string);
    if let Err(e) = state
        .store
        .append_message(session_id, NewMessage::assistant(text, metadata.clone()))
        .await
    {
        warn!(session_id, error = %e, "Failed to persist assistant message");
        let _ = sink.send(Frame::error(format!("failed to save response: {e}"))).await;
        return;
    }

    match metadata {
        Some(raw) => {
            let _ = sink.send(Frame::metadata(raw)).await;
        }
        None => debug!(session_id, "No metadata footer in answer"),
    }

    // Title before close so a client refreshing its session list on stream
    // end already sees it. Bounded by what is left of the exchange budget.
    let remaining = state.orchestrator.timeout().saturating_sub(started.elapsed());
    match timeout(remaining, state.titles.ensure_title(state.store.as_ref(), session_id)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(session_id, error = %e, "Title generation failed"),
        Err(_) => warn!(session_id, "Title generation timed out"),
    }

    info!(
        session_id,
        steps,
        tool_calls,
        frames = sink.written(),
        "Chat exchange finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FailingTools, body_lines, chat_request, scripted_state, scripted_state_with_tools,
        state_for, with_timeout,
    };
    use http_body_util::BodyExt;
    use salesdesk_agent::test_helpers::ScriptedProvider;
    use std::time::Duration;
    use axum::http::StatusCode;
    use salesdesk_agent::test_helpers::{FixedTool, Step, tool_call};
    use salesdesk_core::error::ProviderError;
    use salesdesk_core::message::Role;
    use salesdesk_tools::StaticToolProvider;
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    const FOOTER: &str = r#"<details>{"intent":"VIEW_ACCOUNT","accountID":3,"context":"Viewed MegaMart (ID:3)","actions":[]}</details>"#;

    #[tokio::test]
    async fn new_chat_streams_status_deltas_metadata() {
        let (state, provider) = scripted_state(vec![Step::text([
            "MegaMart Retail Corp ",
            "(ID: 3).\n",
            FOOTER,
        ])]);
        let app = crate::build_router(state.clone());

        let response = app
            .oneshot(chat_request("rep-token", json!({"message": "Show me MegaMart's account details"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["cache-control"], "no-cache");

        let frames: Vec<Frame> = body_lines(response)
            .await
            .iter()
            .map(|l| Frame::from_line(l).unwrap())
            .collect();

        let Frame::Status { session_id, .. } = frames[0] else {
            panic!("first frame must be status: {frames:?}");
        };
        let deltas: String = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Delta { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert!(deltas.starts_with("MegaMart Retail Corp (ID: 3)."));
        assert_eq!(
            frames.last().unwrap(),
            &Frame::metadata(
                r#"{"intent":"VIEW_ACCOUNT","accountID":3,"context":"Viewed MegaMart (ID:3)","actions":[]}"#
            )
        );

        let messages = state.store.list_messages(session_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, deltas);
        assert!(messages[1].metadata.is_some());

        let session = state.store.get_session(session_id).await.unwrap().unwrap();
        assert!(session.title.is_some());
        assert_eq!(provider.completions(), 1);
    }

    #[tokio::test]
    async fn answer_without_footer_has_no_metadata_frame() {
        let (state, _) = scripted_state(vec![Step::text(["Hello there"])]);
        let app = crate::build_router(state);

        let response = app
            .oneshot(chat_request("rep-token", json!({"message": "hi"})))
            .await
            .unwrap();
        let lines = body_lines(response).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(Frame::from_line(&lines[1]).unwrap(), Frame::delta("Hello there"));
    }

    #[tokio::test]
    async fn stored_footers_seed_the_next_prompt() {
        let (state, provider) = scripted_state(vec![
            Step::text([FOOTER]),
            Step::text(["Sure."]),
        ]);

        let first = crate::build_router(state.clone())
            .oneshot(chat_request("rep-token", json!({"message": "Show me MegaMart"})))
            .await
            .unwrap();
        let lines = body_lines(first).await;
        let Frame::Status { session_id, .. } = Frame::from_line(&lines[0]).unwrap() else {
            panic!("expected status");
        };

        let second = crate::build_router(state.clone())
            .oneshot(chat_request(
                "rep-token",
                json!({"message": "And its orders?", "sessionId": session_id, "context": "ignored"}),
            ))
            .await
            .unwrap();
        body_lines(second).await;

        let requests = provider.requests();
        let turn = &requests[1].messages[1].content;
        assert!(turn.starts_with("CHAT HISTORY CONTEXT: Message log at: "));
        assert!(turn.contains("Viewed MegaMart (ID:3)"));
        assert!(turn.contains("Account: 3\n"));
        assert!(!turn.contains("ignored"));
        assert!(turn.ends_with("And its orders?"));
    }

    #[tokio::test]
    async fn client_context_used_for_fresh_session() {
        let (state, provider) = scripted_state(vec![Step::text(["ok"])]);
        let response = crate::build_router(state.clone())
            .oneshot(chat_request(
                "rep-token",
                json!({"message": "hi", "context": "Account: 9\n"}),
            ))
            .await
            .unwrap();
        let lines = body_lines(response).await;
        let Frame::Status { session_id, .. } = Frame::from_line(&lines[0]).unwrap() else {
            panic!("expected status");
        };

        let turn = provider.requests()[0].messages[1].content.clone();
        assert_eq!(turn, "CHAT HISTORY CONTEXT: Account: 9\n\n\nhi");
        let stored = state.store.list_messages(session_id).await.unwrap();
        assert_eq!(stored[0].context.as_deref(), Some("Account: 9\n"));
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let (state, provider) = scripted_state(vec![]);
        let response = crate::build_router(state)
            .oneshot(chat_request("", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(provider.stream_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (state, _) = scripted_state(vec![Step::text(["x"])]);
        let response = crate::build_router(state)
            .oneshot(chat_request("rep-token", json!({"message": "hi", "sessionId": 42})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn registry_failure_writes_no_frames() {
        let (state, provider) = scripted_state_with_tools(vec![Step::text(["x"])], Arc::new(FailingTools));
        let response = crate::build_router(state.clone())
            .oneshot(chat_request("rep-token", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_ne!(response.headers()["content-type"], "text/plain; charset=utf-8");

        let lines = body_lines(response).await;
        assert_eq!(lines.len(), 1);
        assert!(Frame::from_line(&lines[0]).is_err());
        assert_eq!(provider.stream_calls(), 0);
        assert!(state.store.list_sessions(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mid_stream_failure_becomes_error_frame() {
        let (state, provider) = scripted_state(vec![Step::FailAfter {
            text: vec!["Partial ".into()],
            error: ProviderError::StreamInterrupted("overloaded".into()),
        }]);
        let response = crate::build_router(state.clone())
            .oneshot(chat_request("rep-token", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let frames: Vec<Frame> = body_lines(response)
            .await
            .iter()
            .map(|l| Frame::from_line(l).unwrap())
            .collect();
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[2], Frame::Error { content } if content.contains("overloaded")));

        let Frame::Status { session_id, .. } = frames[0] else {
            panic!("expected status");
        };
        let stored = state.store.list_messages(session_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(provider.completions(), 0);
    }

    #[tokio::test]
    async fn step_cap_persists_partial_answer() {
        let looping = || Step::ToolCalls {
            text: vec!["Checking. ".into()],
            calls: vec![tool_call("c", "get_orders", json!({}))],
        };
        let tools = StaticToolProvider::new().with_tool(FixedTool::new("get_orders", "[]"));
        let (state, provider) =
            scripted_state_with_tools(vec![looping(), looping(), looping()], Arc::new(tools));
        let state = crate::test_support::with_max_steps(state, 2);

        let response = crate::build_router(state.clone())
            .oneshot(chat_request("rep-token", json!({"message": "orders?"})))
            .await
            .unwrap();
        let frames: Vec<Frame> = body_lines(response)
            .await
            .iter()
            .map(|l| Frame::from_line(l).unwrap())
            .collect();

        assert!(!frames.iter().any(|f| matches!(f, Frame::Error { .. })));
        assert_eq!(provider.stream_calls(), 2);
        let Frame::Status { session_id, .. } = frames[0] else {
            panic!("expected status");
        };
        let stored = state.store.list_messages(session_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].content, "Checking. Checking. ");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (state, _) = scripted_state(vec![]);
        let response = crate::build_router(state)
            .oneshot(chat_request("rep-token", json!({"message": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_title_model_does_not_hold_the_stream_open() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![Step::text(["Done.\n", FOOTER])]).with_stalled_title(),
        );
        let state = state_for(provider.clone(), Arc::new(StaticToolProvider::new()));
        let state = with_timeout(state, Duration::from_secs(5));

        let response = crate::build_router(state.clone())
            .oneshot(chat_request("rep-token", json!({"message": "MegaMart?"})))
            .await
            .unwrap();
        let lines = tokio::time::timeout(Duration::from_secs(600), body_lines(response))
            .await
            .expect("stream must close once the budget is spent");
        let frames: Vec<Frame> = lines.iter().map(|l| Frame::from_line(l).unwrap()).collect();

        assert!(matches!(frames.last(), Some(Frame::Metadata { .. })));
        let Frame::Status { session_id, .. } = frames[0] else {
            panic!("expected status");
        };
        let session = state.store.get_session(session_id).await.unwrap().unwrap();
        assert!(session.title.is_none());
        assert_eq!(state.store.list_messages(session_id).await.unwrap().len(), 2);
        assert_eq!(provider.completions(), 1);
    }

    #[tokio::test]
    async fn dropping_the_body_stops_further_model_steps() {
        let steps = vec![
            Step::ToolCalls {
                text: vec!["Looking ".into(), "that up. ".into()],
                calls: vec![tool_call("c", "get_orders", json!({}))],
            },
            Step::text(["You have no orders."]),
        ];
        let tools = StaticToolProvider::new().with_tool(FixedTool::new("get_orders", "[]"));
        let (state, provider) = scripted_state_with_tools(steps, Arc::new(tools));

        let response = crate::build_router(state.clone())
            .oneshot(chat_request("rep-token", json!({"message": "orders?"})))
            .await
            .unwrap();
        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().ok().unwrap();
        let line = String::from_utf8(first.to_vec()).unwrap();
        let Frame::Status { session_id, .. } = Frame::from_line(line.trim_end()).unwrap() else {
            panic!("expected status, got {line}");
        };
        drop(body);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.stream_calls(), 1);
        let stored = state.store.list_messages(session_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, Role::User);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_model_ends_with_timeout_error() {
        let (state, _) = scripted_state(vec![Step::Stall]);
        let state = with_timeout(state, Duration::from_secs(5));

        let response = crate::build_router(state.clone())
            .oneshot(chat_request("rep-token", json!({"message": "hello?"})))
            .await
            .unwrap();
        let frames: Vec<Frame> = body_lines(response)
            .await
            .iter()
            .map(|l| Frame::from_line(l).unwrap())
            .collect();

        assert_eq!(frames.last(), Some(&Frame::error("exchange timed out")));
        assert_eq!(
            frames.iter().filter(|f| matches!(f, Frame::Error { .. })).count(),
            1
        );
        let Frame::Status { session_id, .. } = frames[0] else {
            panic!("expected status");
        };
        let stored = state.store.list_messages(session_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, Role::User);
    }
}
