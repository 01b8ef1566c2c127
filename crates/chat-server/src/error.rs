//! Error types for the HTTP surface.
//!
//! RPC failures travel inside a JSON-RPC response body; `ApiError` covers
//! everything that fails before a call is dispatched, and the event stream.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chat_core::ChatError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The caller identity header is missing or malformed.
    #[error("missing or invalid {0} header")]
    MissingCaller(&'static str),

    /// The requested subscription scope could not be parsed.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// A domain error from the service.
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingCaller(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidScope(_) => StatusCode::BAD_REQUEST,
            ApiError::Chat(err) => match err {
                ChatError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                ChatError::NotFound { .. } => StatusCode::NOT_FOUND,
                ChatError::InvalidParticipants { .. } | ChatError::EmptyMessage => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }

        let body = match &self {
            ApiError::Chat(err) => serde_json::json!({
                "error": self.to_string(),
                "detail": err,
            }),
            _ => serde_json::json!({
                "error": self.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}
