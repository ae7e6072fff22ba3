//! Caller identity from `Authorization: Bearer <token>`.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use salesdesk_core::error::ExchangeError;
use salesdesk_core::identity::Owner;
use tracing::warn;

use crate::SharedState;
use crate::error::ApiError;

/// The resolved caller of a request. Rejects with 401 before the handler runs.
#[derive(Debug, Clone)]
pub struct Caller(pub Owner);

impl FromRequestParts<SharedState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or_default();

        if token.is_empty() {
            return Err(ExchangeError::Authentication("missing bearer token".into()).into());
        }

        match state.identity.resolve(token).await {
            Some(owner) => Ok(Caller(owner)),
            None => {
                warn!(path = %parts.uri.path(), "Rejected unknown bearer token");
                Err(ExchangeError::Authentication("unknown bearer token".into()).into())
            }
        }
    }
}
