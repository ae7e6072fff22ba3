//! Read-only session endpoints backing the chat sidebar.

use axum::extract::{Json, Path, State};
use salesdesk_core::error::StoreError;
use salesdesk_core::session::{SessionDetail, SessionId, SessionSummary};

use crate::SharedState;
use crate::auth::Caller;
use crate::error::ApiError;

/// `GET /chat/sessions`: the caller's sessions, newest first.
pub async fn list_sessions_handler(
    State(state): State<SharedState>,
    Caller(owner): Caller,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let sessions = state.store.list_sessions(owner.id).await?;
    Ok(Json(sessions.into_iter().map(SessionSummary::from).collect()))
}

/// `GET /chat/sessions/{id}`: one session with its messages in order.
pub async fn get_session_handler(
    State(state): State<SharedState>,
    Caller(owner): Caller,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionDetail>, ApiError> {
    let session = match state.store.get_session(id).await? {
        Some(session) if session.owner_id == owner.id => session,
        _ => return Err(StoreError::SessionNotFound(id).into()),
    };
    let messages = state.store.list_messages(id).await?;
    Ok(Json(SessionDetail {
        session: session.into(),
        messages,
    }))
}
