//! Route handlers for the chat server.

pub mod events;
pub mod health;
pub mod rpc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::Router;
use chat_core::rpc::USER_HEADER;
use chat_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Build the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(health::health))
        // API endpoints
        .route("/api/v1/rpc", post(rpc::rpc))
        .route("/api/v1/events", get(events::events))
}

/// The caller's session identity, taken from the `x-chat-user` header.
///
/// Authentication happens in front of this service; the header is trusted.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .map(Caller)
            .ok_or(ApiError::MissingCaller(USER_HEADER))
    }
}
