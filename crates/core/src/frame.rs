//! Wire frames of the chat stream.
//!
//! One frame per line, UTF-8, `\n`-terminated:
//!
//! ```text
//! {"type":"status","sessionID":42,"content":"..."}
//! {"type":"delta","content":"Here are"}
//! {"type":"metadata","content":"{\"intent\":\"VIEW_ACCOUNT\"}"}
//! {"type":"error","content":"exchange timed out"}
//! ```
//!
//! `serde_json` escapes control characters inside strings, so an encoded
//! frame never contains a raw newline and line splitting stays sound.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionId;

/// Content of the `status` frame written before generation starts.
pub const STATUS_PENDING: &str = "...";

/// A single unit of the server → client stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Always first; binds the exchange to a persisted session.
    Status {
        #[serde(rename = "sessionID")]
        session_id: SessionId,
        content: String,
    },
    /// An increment of assistant text.
    Delta { content: String },
    /// The raw footer extracted from the finished answer. At most one, always last.
    Metadata { content: String },
    /// A failure after streaming started.
    Error { content: String },
}

/// Why a line could not be decoded into a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Error parsing JSON: {0}")]
    Malformed(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

impl Frame {
    pub fn status(session_id: SessionId) -> Self {
        Self::Status {
            session_id,
            content: STATUS_PENDING.into(),
        }
    }

    pub fn delta(content: impl Into<String>) -> Self {
        Self::Delta {
            content: content.into(),
        }
    }

    pub fn metadata(content: impl Into<String>) -> Self {
        Self::Metadata {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    /// Frame type name as it appears on the wire.
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Delta { .. } => "delta",
            Self::Metadata { .. } => "metadata",
            Self::Error { .. } => "error",
        }
    }

    /// Encode as one newline-terminated line.
    pub fn to_line(&self) -> String {
        // A tagged enum of strings and integers cannot fail to serialize.
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }

    /// Decode one line (without its terminator).
    pub fn from_line(line: &str) -> Result<Self, FrameError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| FrameError::Malformed(e.to_string()))?;

        let frame_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| FrameError::Malformed("missing \"type\" field".into()))?;

        match frame_type {
            "status" | "delta" | "metadata" | "error" => {
                serde_json::from_value(value).map_err(|e| FrameError::Malformed(e.to_string()))
            }
            other => Err(FrameError::UnknownType(other.to_string())),
        }
    }
}
