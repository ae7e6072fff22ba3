//! Chat sessions and their persisted messages.
//!
//! A session is an ordered, append-only log of messages owned by one sales
//! rep. Every exchange appends exactly one user message and, on success,
//! exactly one assistant message. A session's title starts unset and is
//! written at most once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::message::Role;

/// Session identifiers are the integers carried by `status` frames.
pub type SessionId = i64;

/// A chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub owner_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    /// Raw footer text extracted from an assistant answer; not guaranteed to be valid JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// Context string a client sent alongside a user message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A session as listed in the sidebar: the wire shape of
/// `GET /chat/sessions` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Session> for SessionSummary {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            title: s.title,
            created_at: s.created_at,
        }
    }
}

/// A session with its full transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: SessionSummary,
    pub messages: Vec<ChatMessage>,
}

/// The fields a caller supplies when appending a message.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub metadata: Option<String>,
    pub context: Option<String>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>, context: Option<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            metadata: None,
            context: context.filter(|c| !c.is_empty()),
        }
    }

    pub fn assistant(content: impl Into<String>, metadata: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            metadata,
            context: None,
        }
    }
}

/// Durable record of sessions and messages.
///
/// Writes are append-only per session, so concurrent exchanges in different
/// sessions never conflict. The only mutable field is `Session::title`, and
/// it is guarded by [`SessionStore::set_title_if_unset`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    async fn create_session(&self, owner_id: i64) -> Result<Session, StoreError>;

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    /// Sessions owned by `owner_id`, newest first.
    async fn list_sessions(&self, owner_id: i64) -> Result<Vec<Session>, StoreError>;

    /// Append a message. Never mutates earlier messages.
    async fn append_message(
        &self,
        session_id: SessionId,
        message: NewMessage,
    ) -> Result<ChatMessage, StoreError>;

    /// Messages of a session in creation order.
    async fn list_messages(&self, session_id: SessionId) -> Result<Vec<ChatMessage>, StoreError>;

    /// Write `title` only if the session has none yet. Returns whether this
    /// call set it; the first writer wins.
    async fn set_title_if_unset(
        &self,
        session_id: SessionId,
        title: &str,
    ) -> Result<bool, StoreError>;

    /// Fetch the given session, or create a new one when no id is supplied.
    ///
    /// A session owned by someone else is reported as not found.
    async fn resolve_session(
        &self,
        session_id: Option<SessionId>,
        owner_id: i64,
    ) -> Result<Session, StoreError> {
        match session_id {
            Some(id) => match self.get_session(id).await? {
                Some(session) if session.owner_id == owner_id => Ok(session),
                Some(_) | None => Err(StoreError::SessionNotFound(id)),
            },
            None => {
                let session = self.create_session(owner_id).await?;
                debug!(session_id = session.id, owner_id, "Created chat session");
                Ok(session)
            }
        }
    }
}

/// Render a session's messages as plain text, one message per paragraph.
pub fn transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
