//! Failure responses written before any frame.
//!
//! Once the first frame is out the status line is committed, so these are
//! only ever produced on the path leading up to the stream.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use salesdesk_core::error::{ExchangeError, StoreError};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A structured `{"error": ...}` response with its status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl From<ExchangeError> for ApiError {
    fn from(err: ExchangeError) -> Self {
        let status = match &err {
            ExchangeError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ExchangeError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ExchangeError::NotFound(_) => StatusCode::NOT_FOUND,
            ExchangeError::Store(_) | ExchangeError::StreamingFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ExchangeError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = self.status.as_u16(), error = %self.message, "Request failed");
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_errors_map_to_status_codes() {
        let cases = [
            (ExchangeError::Authentication("x".into()), StatusCode::UNAUTHORIZED),
            (ExchangeError::UpstreamUnavailable("x".into()), StatusCode::BAD_GATEWAY),
            (ExchangeError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ExchangeError::Store("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn missing_session_is_not_found() {
        let err = ApiError::from(StoreError::SessionNotFound(42));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(err.message.contains("42"));
    }
}
