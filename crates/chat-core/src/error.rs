//! Error types for conversation operations.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::UserId;

/// Errors that can occur in the conversation subsystem.
///
/// Integrity errors (`InvalidParticipants`, `Unauthorized`) are programming
/// errors and are never retried. `SubscriptionDropped` and `Transport` are
/// transient.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ChatError {
    /// A conversation was requested between a user and themselves.
    #[error("a conversation needs two distinct participants, got {user_id} twice")]
    InvalidParticipants { user_id: UserId },

    /// The caller is not allowed to touch the resource.
    #[error("user {user_id} is not authorized for {resource}")]
    Unauthorized { user_id: UserId, resource: String },

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Message content was empty after trimming.
    #[error("message content is empty")]
    EmptyMessage,

    /// Persisting a message failed or timed out; the optimistic entry was rolled back.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The realtime feed dropped; recovered by reconnect and backlog replay.
    #[error("subscription dropped: {0}")]
    SubscriptionDropped(String),

    /// HTTP/JSON transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Storage failure on the server.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// Build an `Unauthorized` error for a conversation-level resource.
    pub fn unauthorized(user_id: UserId, resource: impl std::fmt::Display) -> Self {
        ChatError::Unauthorized {
            user_id,
            resource: resource.to_string(),
        }
    }

    /// Build a `SendFailed` error for a persistence call that never answered.
    pub fn send_timed_out(after: Duration) -> Self {
        ChatError::SendFailed(format!("no response after {:?}", after))
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChatError::SubscriptionDropped(_) | ChatError::Transport(_) | ChatError::Storage(_)
        )
    }

    /// Whether this is an integrity error that must fail loudly.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            ChatError::InvalidParticipants { .. } | ChatError::Unauthorized { .. }
        )
    }
}
