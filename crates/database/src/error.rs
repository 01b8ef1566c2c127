//! Database error types.

use chat_core::{ChatError, ConversationId, UserId};
use thiserror::Error;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLx error (connection, query, etc.)
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Record not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A conversation was requested between a user and themselves.
    #[error("cannot create a conversation of {user_id} with themselves")]
    InvalidParticipants { user_id: UserId },

    /// The user is not a participant of the conversation.
    #[error("user {user_id} is not a participant of conversation {conversation_id}")]
    Unauthorized {
        user_id: UserId,
        conversation_id: ConversationId,
    },

    /// A stored row could not be decoded into a domain value.
    #[error("corrupt {entity} row: {reason}")]
    Corrupt { entity: &'static str, reason: String },
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

impl From<DatabaseError> for ChatError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::InvalidParticipants { user_id } => {
                ChatError::InvalidParticipants { user_id }
            }
            DatabaseError::Unauthorized {
                user_id,
                conversation_id,
            } => ChatError::unauthorized(user_id, format!("conversation {}", conversation_id)),
            DatabaseError::NotFound { entity, id } => ChatError::NotFound {
                entity: entity.to_string(),
                id,
            },
            other => ChatError::Storage(other.to_string()),
        }
    }
}
