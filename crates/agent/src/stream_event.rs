//! Exchange-level streaming events.
//!
//! `ExchangeEvent` wraps provider-level stream chunks and tool activity into
//! the events the gateway turns into wire frames. Only `Delta` and `Error`
//! reach the client; the rest feed logging and the exchange outcome.

use salesdesk_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// How an exchange that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    /// The model answered without requesting further tools.
    Completed,
    /// The step cap was hit while the model still wanted tools.
    StepCapReached,
}

/// Events emitted by the orchestrator while an exchange runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeEvent {
    /// An increment of assistant text, in generation order.
    Delta { content: String },

    /// The model asked for a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// A tool finished; its output has been fed back to the model.
    ToolResult {
        id: String,
        name: String,
        success: bool,
    },

    /// The exchange ended normally.
    Done {
        status: ExchangeStatus,
        steps: usize,
        tool_calls_made: usize,
        usage: Option<Usage>,
    },

    /// The exchange failed after it started. Always the last event.
    Error { message: String },
}

impl ExchangeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
