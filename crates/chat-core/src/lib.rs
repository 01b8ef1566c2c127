//! Core trait and types for the conversation subsystem.
//!
//! This crate provides the shared vocabulary used by both the server-side
//! store and the client-side sync machinery. It defines:
//!
//! - [`Message`], [`Conversation`], [`Participant`] - The persisted shapes
//! - [`ChangeEvent`] / [`Scope`] - What the realtime feed pushes, and to whom
//! - [`ChatBackend`] - The RPC surface a client session talks to
//! - [`ChatError`] - The error taxonomy shared across the wire
//!
//! # Example
//!
//! ```rust
//! use chat_core::{is_unread, Message, MessageType, UserId, ConversationId};
//! use chrono::Utc;
//!
//! let alice = UserId::new();
//! let bob = UserId::new();
//! let read_at = Utc::now();
//!
//! let message = Message {
//!     id: chat_core::MessageId::new(),
//!     conversation_id: ConversationId::new(),
//!     sender_id: alice,
//!     content: "hi".to_string(),
//!     message_type: MessageType::Text,
//!     created_at: read_at + chrono::Duration::seconds(1),
//! };
//!
//! assert!(is_unread(bob, read_at, Some(&message)));
//! assert!(!is_unread(alice, read_at, Some(&message)));
//! ```

mod backend;
mod error;
mod event;
mod ids;
mod message;
pub mod rpc;
mod unread;

pub use backend::{ChatBackend, EventStream};
pub use error::ChatError;
pub use event::{ChangeEvent, Scope};
pub use ids::{ConversationId, MessageId, ParseIdError, UserId};
pub use message::{
    Conversation, ConversationSummary, MarkRead, Message, MessageType, Participant,
};
pub use unread::is_unread;

// Re-export async_trait for backend implementors
pub use async_trait::async_trait;

/// Timestamp type used for every server-assigned time.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
