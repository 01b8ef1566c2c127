//! Transport errors of the HTTP backend.

use chat_core::rpc::RpcError;
use chat_core::ChatError;
use thiserror::Error;

/// Errors raised while talking to the chat server over HTTP.
///
/// Surfaced to callers as [`ChatError`]; RPC errors carry the server's
/// structured error so integrity failures stay loud.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status outside the RPC envelope.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// JSON-RPC error response from the server.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    /// The response carried neither a result nor an error.
    #[error("RPC response without result")]
    EmptyResult,

    /// SSE stream error.
    #[error("SSE error: {0}")]
    Sse(String),
}

impl From<ClientError> for ChatError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Rpc(rpc) => rpc.into_chat_error(),
            ClientError::Sse(reason) => ChatError::SubscriptionDropped(reason),
            other => ChatError::Transport(other.to_string()),
        }
    }
}
