//! In-memory store, useful for testing and ephemeral deployments.

use async_trait::async_trait;
use chrono::Utc;
use salesdesk_core::error::StoreError;
use salesdesk_core::session::{ChatMessage, NewMessage, Session, SessionId, SessionStore};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    sessions: Vec<Session>,
    messages: Vec<ChatMessage>,
    next_session_id: SessionId,
    next_message_id: i64,
}

/// Keeps sessions and messages in process memory. Ids start at 1.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_session(&self, owner_id: i64) -> Result<Session, StoreError> {
        let mut tables = self.tables.write().await;
        tables.next_session_id += 1;
        let session = Session {
            id: tables.next_session_id,
            owner_id,
            title: None,
            created_at: Utc::now(),
        };
        tables.sessions.push(session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sessions(&self, owner_id: i64) -> Result<Vec<Session>, StoreError> {
        let tables = self.tables.read().await;
        // Insertion order is creation order, so reversing gives newest first.
        Ok(tables
            .sessions
            .iter()
            .rev()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        message: NewMessage,
    ) -> Result<ChatMessage, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.iter().any(|s| s.id == session_id) {
            return Err(StoreError::SessionNotFound(session_id));
        }
        tables.next_message_id += 1;
        let stored = ChatMessage {
            id: tables.next_message_id,
            session_id,
            role: message.role,
            content: message.content,
            metadata: message.metadata,
            context: message.context,
            created_at: Utc::now(),
        };
        tables.messages.push(stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, session_id: SessionId) -> Result<Vec<ChatMessage>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn set_title_if_unset(
        &self,
        session_id: SessionId,
        title: &str,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(StoreError::SessionNotFound(session_id))?;
        if session.title.is_some() {
            return Ok(false);
        }
        session.title = Some(title.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salesdesk_core::Role;

    #[tokio::test]
    async fn resolve_creates_then_fetches() {
        let store = InMemoryStore::new();
        let created = store.resolve_session(None, 7).await.unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(created.owner_id, 7);

        let fetched = store.resolve_session(Some(created.id), 7).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn resolve_rejects_missing_and_foreign_sessions() {
        let store = InMemoryStore::new();
        let session = store.create_session(7).await.unwrap();

        let err = store.resolve_session(Some(99), 7).await.unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(99)));

        let err = store.resolve_session(Some(session.id), 8).await.unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn messages_are_appended_in_order() {
        let store = InMemoryStore::new();
        let session = store.create_session(1).await.unwrap();
        store
            .append_message(session.id, NewMessage::user("hi", None))
            .await
            .unwrap();
        store
            .append_message(session.id, NewMessage::assistant("hello", Some("{}".into())))
            .await
            .unwrap();

        let messages = store.list_messages(session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].metadata.as_deref(), Some("{}"));
        assert!(messages[0].id < messages[1].id);
    }

    #[tokio::test]
    async fn append_to_missing_session_fails() {
        let store = InMemoryStore::new();
        let err = store
            .append_message(5, NewMessage::user("hi", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(5)));
    }

    #[tokio::test]
    async fn title_is_written_once() {
        let store = InMemoryStore::new();
        let session = store.create_session(1).await.unwrap();
        assert!(store.set_title_if_unset(session.id, "First").await.unwrap());
        assert!(!store.set_title_if_unset(session.id, "Second").await.unwrap());
        let session = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.title.as_deref(), Some("First"));
    }

    #[tokio::test]
    async fn sessions_listed_newest_first_per_owner() {
        let store = InMemoryStore::new();
        let a = store.create_session(1).await.unwrap();
        store.create_session(2).await.unwrap();
        let c = store.create_session(1).await.unwrap();
        let ids: Vec<_> = store
            .list_sessions(1)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![c.id, a.id]);
    }
}
