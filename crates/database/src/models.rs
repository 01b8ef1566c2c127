//! Database rows and their conversion into domain types.
//!
//! Identifiers are stored as hyphenated lowercase UUID text, so text ordering
//! in SQL matches `Uuid` ordering in Rust. Timestamps are stored as
//! microseconds since the Unix epoch.

use std::str::FromStr;

use chat_core::{
    Conversation, ConversationId, ConversationSummary, Message, MessageId, MessageType,
    Participant, Timestamp, UserId,
};
use sqlx::FromRow;

use crate::error::{DatabaseError, Result};

/// Convert a stored microsecond timestamp.
pub(crate) fn timestamp_from_micros(entity: &'static str, micros: i64) -> Result<Timestamp> {
    chrono::DateTime::from_timestamp_micros(micros).ok_or_else(|| DatabaseError::Corrupt {
        entity,
        reason: format!("timestamp out of range: {}", micros),
    })
}

/// Microseconds since the epoch for storage.
pub(crate) fn timestamp_to_micros(ts: Timestamp) -> i64 {
    ts.timestamp_micros()
}

fn parse_id<T: FromStr>(entity: &'static str, value: &str) -> Result<T> {
    value.parse().map_err(|_| DatabaseError::Corrupt {
        entity,
        reason: format!("invalid id: {}", value),
    })
}

/// A row of `conversations`.
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: String,
    pub created_at: i64,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = DatabaseError;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Conversation {
            id: parse_id("Conversation", &row.id)?,
            created_at: timestamp_from_micros("Conversation", row.created_at)?,
        })
    }
}

/// A row of `conversation_participants`.
#[derive(Debug, Clone, FromRow)]
pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub last_read_at: i64,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = DatabaseError;

    fn try_from(row: ParticipantRow) -> Result<Self> {
        Ok(Participant {
            conversation_id: parse_id("Participant", &row.conversation_id)?,
            user_id: parse_id("Participant", &row.user_id)?,
            last_read_at: timestamp_from_micros("Participant", row.last_read_at)?,
        })
    }
}

/// A row of `messages`.
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
    pub created_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = DatabaseError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let message_type =
            MessageType::from_str(&row.message_type).map_err(|reason| DatabaseError::Corrupt {
                entity: "Message",
                reason,
            })?;

        Ok(Message {
            id: parse_id::<MessageId>("Message", &row.id)?,
            conversation_id: parse_id::<ConversationId>("Message", &row.conversation_id)?,
            sender_id: parse_id::<UserId>("Message", &row.sender_id)?,
            content: row.content,
            message_type,
            created_at: timestamp_from_micros("Message", row.created_at)?,
        })
    }
}

/// One row of the inbox query: the viewer's membership joined with the other
/// participant and the latest message, if any.
#[derive(Debug, Clone, FromRow)]
pub struct InboxRow {
    pub conversation_id: String,
    pub conversation_created_at: i64,
    pub last_read_at: i64,
    pub other_user_id: String,
    pub message_id: Option<String>,
    pub sender_id: Option<String>,
    pub content: Option<String>,
    pub message_type: Option<String>,
    pub message_created_at: Option<i64>,
}

impl InboxRow {
    /// Convert into a summary as seen by `viewer`.
    pub fn into_summary(self, viewer: UserId) -> Result<ConversationSummary> {
        let last_message = match (
            self.message_id,
            self.sender_id,
            self.content,
            self.message_type,
            self.message_created_at,
        ) {
            (Some(id), Some(sender_id), Some(content), Some(message_type), Some(created_at)) => {
                Some(Message::try_from(MessageRow {
                    id,
                    conversation_id: self.conversation_id.clone(),
                    sender_id,
                    content,
                    message_type,
                    created_at,
                })?)
            }
            _ => None,
        };

        let last_read_at = timestamp_from_micros("Participant", self.last_read_at)?;
        let is_unread = chat_core::is_unread(viewer, last_read_at, last_message.as_ref());

        Ok(ConversationSummary {
            conversation_id: parse_id("Conversation", &self.conversation_id)?,
            created_at: timestamp_from_micros("Conversation", self.conversation_created_at)?,
            other_user_id: parse_id("Participant", &self.other_user_id)?,
            last_message,
            last_read_at,
            is_unread,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_micros_round_trip() {
        let now = chrono::Utc::now();
        let micros = timestamp_to_micros(now);
        let back = timestamp_from_micros("Message", micros).unwrap();
        assert_eq!(back.timestamp_micros(), micros);
    }

    #[test]
    fn test_corrupt_message_type() {
        let row = MessageRow {
            id: MessageId::new().to_string(),
            conversation_id: ConversationId::new().to_string(),
            sender_id: UserId::new().to_string(),
            content: "x".to_string(),
            message_type: "image".to_string(),
            created_at: 1,
        };
        let err = Message::try_from(row).unwrap_err();
        assert!(matches!(err, DatabaseError::Corrupt { entity: "Message", .. }));
    }

    #[test]
    fn test_inbox_row_without_messages() {
        let viewer = UserId::new();
        let row = InboxRow {
            conversation_id: ConversationId::new().to_string(),
            conversation_created_at: 10,
            last_read_at: 10,
            other_user_id: UserId::new().to_string(),
            message_id: None,
            sender_id: None,
            content: None,
            message_type: None,
            message_created_at: None,
        };
        let summary = row.into_summary(viewer).unwrap();
        assert!(summary.last_message.is_none());
        assert!(!summary.is_unread);
    }
}
