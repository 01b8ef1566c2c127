//! The unread rule shared by the store and client-side aggregation.

use crate::ids::UserId;
use crate::message::Message;
use crate::Timestamp;

/// Whether `viewer` has unread activity in a conversation.
///
/// True iff the latest message is strictly newer than the viewer's read
/// marker and was not sent by the viewer.
pub fn is_unread(viewer: UserId, last_read_at: Timestamp, latest: Option<&Message>) -> bool {
    match latest {
        Some(message) => message.sender_id != viewer && message.created_at > last_read_at,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConversationId, MessageId, MessageType};
    use chrono::{Duration, Utc};

    fn message_from(sender: UserId, created_at: Timestamp) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id: ConversationId::new(),
            sender_id: sender,
            content: "hello".to_string(),
            message_type: MessageType::Text,
            created_at,
        }
    }

    #[test]
    fn test_empty_conversation_is_read() {
        assert!(!is_unread(UserId::new(), Utc::now(), None));
    }

    #[test]
    fn test_newer_message_from_other_is_unread() {
        let me = UserId::new();
        let read_at = Utc::now();
        let msg = message_from(UserId::new(), read_at + Duration::milliseconds(1));
        assert!(is_unread(me, read_at, Some(&msg)));
    }

    #[test]
    fn test_equal_timestamp_is_read() {
        let me = UserId::new();
        let read_at = Utc::now();
        let msg = message_from(UserId::new(), read_at);
        assert!(!is_unread(me, read_at, Some(&msg)));
    }

    #[test]
    fn test_own_message_never_unread() {
        let me = UserId::new();
        let read_at = Utc::now();
        let msg = message_from(me, read_at + Duration::hours(1));
        assert!(!is_unread(me, read_at, Some(&msg)));
    }
}
