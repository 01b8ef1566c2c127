//! Persisted shapes: conversations, participants and messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, UserId};
use crate::Timestamp;

/// Kind of a stored message.
///
/// The content of every kind is opaque text to this subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    System,
    BookingRequest,
}

impl MessageType {
    /// Wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::System => "system",
            MessageType::BookingRequest => "booking_request",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "system" => Ok(MessageType::System),
            "booking_request" => Ok(MessageType::BookingRequest),
            other => Err(format!("unknown message type: {}", other)),
        }
    }
}

/// A two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: Timestamp,
}

/// Membership of one user in one conversation, with their read marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub last_read_at: Timestamp,
}

/// An immutable, persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Raw content. May embed bracketed tokens; stored and returned verbatim.
    pub content: String,
    pub message_type: MessageType,
    /// Assigned by the store; the source of truth for ordering.
    pub created_at: Timestamp,
}

impl Message {
    /// Total order key within a conversation.
    pub fn order_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id)
    }

    /// Whether this message sorts after `other`.
    pub fn is_newer_than(&self, other: &Message) -> bool {
        self.order_key() > other.order_key()
    }
}

/// Outcome of a mark-read request.
///
/// A marker never moves backwards: an older (or equal) timestamp leaves the
/// stored value untouched and reports `Stale` instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "participant", rename_all = "snake_case")]
pub enum MarkRead {
    /// The marker moved forward.
    Advanced(Participant),
    /// The stored marker was already at or past the requested time.
    Stale(Participant),
}

impl MarkRead {
    /// The participant row as stored after the request.
    pub fn participant(&self) -> &Participant {
        match self {
            MarkRead::Advanced(p) | MarkRead::Stale(p) => p,
        }
    }

    pub fn advanced(&self) -> bool {
        matches!(self, MarkRead::Advanced(_))
    }
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub created_at: Timestamp,
    /// The other participant.
    pub other_user_id: UserId,
    /// Latest message by `(created_at, id)`, if any.
    pub last_message: Option<Message>,
    /// The viewing user's read marker.
    pub last_read_at: Timestamp,
    pub is_unread: bool,
}

impl ConversationSummary {
    /// Time of the latest activity, used to order the list.
    pub fn last_activity(&self) -> Timestamp {
        self.last_message
            .as_ref()
            .map_or(self.created_at, |m| m.created_at)
    }
}
