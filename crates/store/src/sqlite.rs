//! SQLite session store.
//!
//! Two tables:
//! - `chat_sessions`: one row per session, `title` NULL until first set
//! - `chat_messages`: append-only log, ordered by its integer primary key
//!
//! Timestamps are stored as RFC 3339 text with microsecond precision.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use salesdesk_core::error::StoreError;
use salesdesk_core::message::Role;
use salesdesk_core::session::{ChatMessage, NewMessage, Session, SessionId, SessionStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database; the pool is then
    /// pinned to a single long-lived connection so every query sees the
    /// same data.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool_options = if path.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite session store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id    INTEGER NOT NULL,
                title       TEXT,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  INTEGER NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                metadata    TEXT,
                context     TEXT,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_sessions_owner ON chat_sessions(owner_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("owner index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("session index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Fixed-width so text ordering matches time ordering.
    fn format_time(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::QueryFailed(format!("created_at {raw:?}: {e}")))
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, StoreError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let owner_id: i64 = row
            .try_get("owner_id")
            .map_err(|e| StoreError::QueryFailed(format!("owner_id column: {e}")))?;
        let title: Option<String> = row
            .try_get("title")
            .map_err(|e| StoreError::QueryFailed(format!("title column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        Ok(Session {
            id,
            owner_id,
            title,
            created_at: Self::parse_time(&created_at)?,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<ChatMessage, StoreError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let session_id: i64 = row
            .try_get("session_id")
            .map_err(|e| StoreError::QueryFailed(format!("session_id column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let metadata: Option<String> = row
            .try_get("metadata")
            .map_err(|e| StoreError::QueryFailed(format!("metadata column: {e}")))?;
        let context: Option<String> = row
            .try_get("context")
            .map_err(|e| StoreError::QueryFailed(format!("context column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        Ok(ChatMessage {
            id,
            session_id,
            role: Role::from_str(&role).map_err(StoreError::QueryFailed)?,
            content,
            metadata,
            context,
            created_at: Self::parse_time(&created_at)?,
        })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(&self, owner_id: i64) -> Result<Session, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query("INSERT INTO chat_sessions (owner_id, title, created_at) VALUES (?1, NULL, ?2)")
            .bind(owner_id)
            .bind(Self::format_time(&created_at))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("create session: {e}")))?;

        Ok(Session {
            id: result.last_insert_rowid(),
            owner_id,
            title: None,
            created_at,
        })
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT id, owner_id, title, created_at FROM chat_sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get session: {e}")))?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn list_sessions(&self, owner_id: i64) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, title, created_at FROM chat_sessions \
             WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("list sessions: {e}")))?;

        rows.iter().map(Self::row_to_session).collect()
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        message: NewMessage,
    ) -> Result<ChatMessage, StoreError> {
        if self.get_session(session_id).await?.is_none() {
            return Err(StoreError::SessionNotFound(session_id));
        }

        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO chat_messages (session_id, role, content, metadata, context, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.metadata)
        .bind(&message.context)
        .bind(Self::format_time(&created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("append message: {e}")))?;

        Ok(ChatMessage {
            id: result.last_insert_rowid(),
            session_id,
            role: message.role,
            content: message.content,
            metadata: message.metadata,
            context: message.context,
            created_at,
        })
    }

    async fn list_messages(&self, session_id: SessionId) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, metadata, context, created_at \
             FROM chat_messages WHERE session_id = ?1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("list messages: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn set_title_if_unset(
        &self,
        session_id: SessionId,
        title: &str,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE chat_sessions SET title = ?1 WHERE id = ?2 AND title IS NULL")
                .bind(title)
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("set title: {e}")))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_session(session_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::SessionNotFound(session_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_and_get_session() {
        let store = test_store().await;
        let session = store.create_session(7).await.unwrap();
        let fetched = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.owner_id, 7);
        assert!(fetched.title.is_none());
    }

    #[tokio::test]
    async fn get_missing_session_is_none() {
        let store = test_store().await;
        assert!(store.get_session(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_session_enforces_ownership() {
        let store = test_store().await;
        let session = store.create_session(7).await.unwrap();
        assert!(store.resolve_session(Some(session.id), 7).await.is_ok());
        let err = store.resolve_session(Some(session.id), 8).await.unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(id) if id == session.id));
    }

    #[tokio::test]
    async fn messages_round_trip_in_order() {
        let store = test_store().await;
        let session = store.create_session(1).await.unwrap();
        store
            .append_message(session.id, NewMessage::user("Show my accounts", Some("Account: 3".into())))
            .await
            .unwrap();
        store
            .append_message(
                session.id,
                NewMessage::assistant("Here they are", Some("{\"intent\":\"VIEW_ACCOUNT\"}".into())),
            )
            .await
            .unwrap();

        let messages = store.list_messages(session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].context.as_deref(), Some("Account: 3"));
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].metadata.as_deref(), Some("{\"intent\":\"VIEW_ACCOUNT\"}"));
    }

    #[tokio::test]
    async fn append_to_missing_session_fails() {
        let store = test_store().await;
        let err = store
            .append_message(9, NewMessage::user("hi", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(9)));
    }

    #[tokio::test]
    async fn title_first_writer_wins() {
        let store = test_store().await;
        let session = store.create_session(1).await.unwrap();
        assert!(store.set_title_if_unset(session.id, "Accounts").await.unwrap());
        assert!(!store.set_title_if_unset(session.id, "Orders").await.unwrap());
        let session = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.title.as_deref(), Some("Accounts"));
    }

    #[tokio::test]
    async fn title_on_missing_session_fails() {
        let store = test_store().await;
        let err = store.set_title_if_unset(3, "x").await.unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(3)));
    }

    #[tokio::test]
    async fn sessions_listed_newest_first() {
        let store = test_store().await;
        let first = store.create_session(1).await.unwrap();
        let second = store.create_session(1).await.unwrap();
        store.create_session(2).await.unwrap();
        let ids: Vec<_> = store
            .list_sessions(1)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let url = format!("sqlite://{}", path.display());

        let id = {
            let store = SqliteStore::new(&url).await.unwrap();
            let session = store.create_session(1).await.unwrap();
            store
                .append_message(session.id, NewMessage::user("persist me", None))
                .await
                .unwrap();
            session.id
        };

        let store = SqliteStore::new(&url).await.unwrap();
        let messages = store.list_messages(id).await.unwrap();
        assert_eq!(messages[0].content, "persist me");
    }

    #[tokio::test]
    async fn backend_name() {
        assert_eq!(test_store().await.name(), "sqlite");
    }

    #[tokio::test]
    async fn corrupt_timestamp_is_an_error() {
        let store = test_store().await;
        let session = store.create_session(7).await.unwrap();
        sqlx::query("UPDATE chat_sessions SET created_at = 'yesterday-ish' WHERE id = ?")
            .bind(session.id)
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.get_session(session.id).await.unwrap_err();
        assert!(matches!(err, StoreError::QueryFailed(m) if m.contains("yesterday-ish")));
    }
}
