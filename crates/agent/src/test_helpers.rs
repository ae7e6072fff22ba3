//! Scripted collaborators for tests.
//!
//! Enabled inside this crate's tests and, for other crates, through the
//! `test-util` feature.

use async_trait::async_trait;
use salesdesk_core::error::{ProviderError, ToolError};
use salesdesk_core::message::{Message, MessageToolCall};
use salesdesk_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk,
};
use salesdesk_core::tool::{Tool, ToolResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// What the scripted model does on one streaming call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Stream the given deltas, then finish with no tool calls.
    Text(Vec<String>),
    /// Stream the given deltas, then request tool calls.
    ToolCalls {
        text: Vec<String>,
        calls: Vec<MessageToolCall>,
    },
    /// Stream the given deltas, then fail mid-stream.
    FailAfter {
        text: Vec<String>,
        error: ProviderError,
    },
    /// Refuse the call outright.
    Unreachable(ProviderError),
    /// Never produce anything; ends when the receiver is dropped.
    Stall,
}

impl Step {
    pub fn text<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Text(deltas.into_iter().map(Into::into).collect())
    }
}

/// Build a tool call with JSON arguments.
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    }
}

/// A provider that replays a queue of [`Step`]s, one per `stream()` call,
/// and answers every `complete()` call with a fixed title.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    title: String,
    requests: Mutex<Vec<ProviderRequest>>,
    completions: AtomicUsize,
    stall_titles: bool,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            title: "Scripted Session Title".into(),
            requests: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            stall_titles: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Make every `complete()` call hang forever.
    pub fn with_stalled_title(mut self) -> Self {
        self.stall_titles = true;
        self
    }

    /// Every streaming request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn stream_calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Number of `complete()` calls (title generations).
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        if self.stall_titles {
            std::future::pending::<()>().await;
        }
        Ok(ProviderResponse {
            message: Message::assistant(self.title.clone()),
            usage: None,
            model: request.model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let step = self
            .steps
            .lock()
            .ok()
            .and_then(|mut steps| steps.pop_front())
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            })?;

        let (tx, rx) = mpsc::channel(8);
        match step {
            Step::Unreachable(error) => return Err(error),
            Step::Stall => {
                tokio::spawn(async move { tx.closed().await });
            }
            Step::Text(text) => spawn_chunks(tx, text, Ok(Vec::new())),
            Step::ToolCalls { text, calls } => spawn_chunks(tx, text, Ok(calls)),
            Step::FailAfter { text, error } => spawn_chunks(tx, text, Err(error)),
        }
        Ok(rx)
    }
}

fn spawn_chunks(
    tx: mpsc::Sender<Result<StreamChunk, ProviderError>>,
    text: Vec<String>,
    end: Result<Vec<MessageToolCall>, ProviderError>,
) {
    tokio::spawn(async move {
        for delta in text {
            if tx.send(Ok(StreamChunk::text(delta))).await.is_err() {
                return;
            }
        }
        let last = end.map(|tool_calls| StreamChunk {
            tool_calls,
            done: true,
            ..StreamChunk::default()
        });
        let _ = tx.send(last).await;
    });
}

/// A tool that always answers with the same output and counts its calls.
pub struct FixedTool {
    name: String,
    output: String,
    calls: AtomicUsize,
}

impl FixedTool {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FixedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Returns a canned response"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: self.output.clone(),
        })
    }
}
