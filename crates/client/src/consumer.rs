//! Reads a chat response stream and drives [`ChatState`] with it.

use futures::{Stream, StreamExt};
use salesdesk_core::frame::Frame;
use salesdesk_core::session::{SessionDetail, SessionId, SessionSummary};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;
use tracing::{debug, warn};

use crate::framer::LineFramer;
use crate::state::{ChatState, Effect, Panel};

/// What the embedding UI does with the reducer's output.
///
/// Only `effect` is required; the other hooks let a host render live
/// instead of re-reading the whole state after every frame.
pub trait UiHost {
    fn effect(&mut self, effect: Effect);

    /// A text increment was appended to the answer.
    fn delta(&mut self, _content: &str) {}

    /// An error entry was added to the transcript.
    fn notice(&mut self, _message: &str) {}

    /// The side panel changed.
    fn panel(&mut self, _panel: Panel) {}
}

/// Records effects and ignores everything else.
impl UiHost for Vec<Effect> {
    fn effect(&mut self, effect: Effect) {
        self.push(effect);
    }
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    /// The server closed the stream normally.
    Completed,
    /// The server reported an in-band failure.
    Failed(String),
    /// The transport broke before the stream closed.
    Interrupted(String),
}

/// Consume a response body chunk by chunk until it ends.
///
/// Frames are applied in arrival order. An undecodable line becomes an
/// inline error and reading continues; an `error` frame ends the exchange.
pub async fn drive<S, B, E>(body: S, state: &mut ChatState, host: &mut impl UiHost) -> DriveOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut framer = LineFramer::new();
    let mut outcome = DriveOutcome::Completed;

    'read: while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Chat stream interrupted");
                let message = format!("Connection lost: {e}");
                state.apply(Frame::error(message.clone()));
                host.notice(&message);
                outcome = DriveOutcome::Interrupted(e.to_string());
                break;
            }
        };
        for line in framer.push(chunk.as_ref()) {
            if let Some(message) = apply_line(&line, state, host) {
                outcome = DriveOutcome::Failed(message);
                break 'read;
            }
        }
    }

    if outcome == DriveOutcome::Completed
        && let Some(line) = framer.finish()
        && let Some(message) = apply_line(&line, state, host)
    {
        outcome = DriveOutcome::Failed(message);
    }

    for effect in state.end_exchange() {
        host.effect(effect);
    }
    outcome
}

/// Apply one line. Returns the message of an `error` frame.
fn apply_line(line: &str, state: &mut ChatState, host: &mut impl UiHost) -> Option<String> {
    let frame = match Frame::from_line(line) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Skipping undecodable line");
            state.apply_parse_error(&e);
            host.notice(&e.to_string());
            return None;
        }
    };

    let panel_before = state.panel;
    let failure = match &frame {
        Frame::Delta { content } => {
            host.delta(content);
            None
        }
        Frame::Error { content } => {
            host.notice(content);
            Some(content.clone())
        }
        _ => None,
    };

    for effect in state.apply(frame) {
        host.effect(effect);
    }
    if state.panel != panel_before {
        host.panel(state.panel);
    }
    failure
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("An exchange is already streaming")]
    Busy,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the chat gateway.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Send one message and stream the answer into `state`.
    ///
    /// A request that fails before streaming starts still leaves one error
    /// entry in the transcript.
    pub async fn stream_chat(
        &self,
        state: &mut ChatState,
        message: &str,
        context: Option<&str>,
        host: &mut impl UiHost,
    ) -> Result<DriveOutcome, ClientError> {
        if state.is_streaming() {
            return Err(ClientError::Busy);
        }
        state.begin_exchange(message);

        let body = ChatBody {
            message,
            session_id: state.session_id,
            context,
        };
        let sent = self
            .http
            .post(format!("{}/chat", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                self.fail(state, host, e.to_string());
                return Err(e.into());
            }
        };
        if !response.status().is_success() {
            let err = status_error(response).await;
            self.fail(state, host, err.to_string());
            return Err(err);
        }

        Ok(drive(response.bytes_stream(), state, host).await)
    }

    /// The caller's sessions, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ClientError> {
        self.get_json("/chat/sessions").await
    }

    pub async fn get_session(&self, id: SessionId) -> Result<SessionDetail, ClientError> {
        self.get_json(&format!("/chat/sessions/{id}")).await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(response.json().await?)
    }

    fn fail(&self, state: &mut ChatState, host: &mut impl UiHost, message: String) {
        host.notice(&message);
        for effect in state.fail_exchange(message) {
            host.effect(effect);
        }
    }
}

async fn status_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    ClientError::Status { status, message }
}
