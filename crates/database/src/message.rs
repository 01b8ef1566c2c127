//! Message Store: append-only, totally ordered per conversation.

use chat_core::{ConversationId, Message, MessageId, MessageType, UserId};
use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::MessageRow;
use crate::Database;

/// Append a message from `sender_id`.
///
/// Membership check, timestamp assignment and insert run as one statement.
/// `created_at` is the later of the store clock and one microsecond past the
/// newest message already in the conversation, so it strictly increases
/// within a conversation no matter what the wall clock does. The clock then
/// observes the stored value, so later read markers sort after it. Content is
/// stored verbatim.
pub async fn append_message(
    db: &Database,
    conversation_id: ConversationId,
    sender_id: UserId,
    content: &str,
    message_type: MessageType,
) -> Result<Message> {
    let row = sqlx::query_as::<_, MessageRow>(
        r#"
        INSERT INTO messages (id, conversation_id, sender_id, content, message_type, created_at)
        SELECT ?1, ?2, ?3, ?4, ?5, MAX(
            ?6,
            COALESCE((SELECT MAX(created_at) FROM messages WHERE conversation_id = ?2), 0) + 1
        )
        WHERE EXISTS (
            SELECT 1 FROM conversation_participants
            WHERE conversation_id = ?2 AND user_id = ?3
        )
        RETURNING id, conversation_id, sender_id, content, message_type, created_at
        "#,
    )
    .bind(MessageId::new().to_string())
    .bind(conversation_id.to_string())
    .bind(sender_id.to_string())
    .bind(content)
    .bind(message_type.as_str())
    .bind(db.clock().now_micros())
    .fetch_optional(db.pool())
    .await?
    .ok_or(DatabaseError::Unauthorized {
        user_id: sender_id,
        conversation_id,
    })?;
    db.clock().observe(row.created_at);

    let message = Message::try_from(row)?;
    tracing::debug!(
        conversation_id = %conversation_id,
        message_id = %message.id,
        "Appended message"
    );
    Ok(message)
}

/// All messages of a conversation, ascending by `(created_at, id)`.
pub async fn list_messages(
    pool: &SqlitePool,
    conversation_id: ConversationId,
) -> Result<Vec<Message>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, conversation_id, sender_id, content, message_type, created_at
        FROM messages
        WHERE conversation_id = ?
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(conversation_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Message::try_from).collect()
}

/// The newest message of a conversation by `(created_at, id)`.
pub async fn latest_message(
    pool: &SqlitePool,
    conversation_id: ConversationId,
) -> Result<Option<Message>> {
    let row = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, conversation_id, sender_id, content, message_type, created_at
        FROM messages
        WHERE conversation_id = ?
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(conversation_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(Message::try_from).transpose()
}

/// Get a message by ID.
pub async fn get_message(pool: &SqlitePool, id: MessageId) -> Result<Message> {
    sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, conversation_id, sender_id, content, message_type, created_at
        FROM messages
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "Message",
        id: id.to_string(),
    })?
    .try_into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::get_or_create;

    async fn setup() -> (Database, ConversationId, UserId, UserId) {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let id = get_or_create(&db, a, b).await.unwrap().conversation.id;
        (db, id, a, b)
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_time_then_id() {
        let (db, id, a, b) = setup().await;

        let mut appended = Vec::new();
        for i in 0..20 {
            let sender = if i % 3 == 0 { a } else { b };
            appended.push(
                append_message(&db, id, sender, &format!("m{}", i), MessageType::Text)
                    .await
                    .unwrap(),
            );
        }

        let listed = list_messages(db.pool(), id).await.unwrap();
        assert_eq!(listed, appended);
        assert!(listed.windows(2).all(|w| w[1].is_newer_than(&w[0])));
        assert!(listed.windows(2).all(|w| w[1].created_at > w[0].created_at));
    }

    #[tokio::test]
    async fn test_created_at_survives_backwards_wall_clock() {
        let (db, id, a, _) = setup().await;
        let first = append_message(&db, id, a, "first", MessageType::Text)
            .await
            .unwrap();

        // Simulate a message stored with a time far in the future.
        let future = first.created_at.timestamp_micros() + 3_600_000_000;
        sqlx::query(
            "INSERT INTO messages
             (id, conversation_id, sender_id, content, message_type, created_at)
             VALUES (?, ?, ?, ?, 'text', ?)",
        )
        .bind(MessageId::new().to_string())
        .bind(id.to_string())
        .bind(a.to_string())
        .bind("from the future")
        .bind(future)
        .execute(db.pool())
        .await
        .unwrap();

        let next = append_message(&db, id, a, "after", MessageType::Text)
            .await
            .unwrap();
        assert_eq!(next.created_at.timestamp_micros(), future + 1);
        assert_eq!(latest_message(db.pool(), id).await.unwrap().unwrap().id, next.id);
    }

    #[tokio::test]
    async fn test_non_participant_cannot_append() {
        let (db, id, _, _) = setup().await;
        let mallory = UserId::new();
        let err = append_message(&db, id, mallory, "hi", MessageType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Unauthorized { user_id, .. } if user_id == mallory));
        assert!(list_messages(db.pool(), id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_unauthorized() {
        let (db, _, a, _) = setup().await;
        let err = append_message(&db, ConversationId::new(), a, "hi", MessageType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_content_is_stored_verbatim() {
        let (db, id, a, _) = setup().await;
        let raw = "  [POST_FEEDBACK:job-7] Thanks!\n[JOB_LINK:x] 日本語 ";
        let msg = append_message(&db, id, a, raw, MessageType::System)
            .await
            .unwrap();
        let fetched = get_message(db.pool(), msg.id).await.unwrap();
        assert_eq!(fetched.content, raw);
        assert_eq!(fetched.message_type, MessageType::System);
    }

    #[tokio::test]
    async fn test_messages_are_immutable() {
        let (db, id, a, _) = setup().await;
        let msg = append_message(&db, id, a, "original", MessageType::Text)
            .await
            .unwrap();

        let update = sqlx::query("UPDATE messages SET content = 'edited' WHERE id = ?")
            .bind(msg.id.to_string())
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(msg.id.to_string())
            .execute(db.pool())
            .await;
        assert!(delete.is_err());

        assert_eq!(get_message(db.pool(), msg.id).await.unwrap().content, "original");
    }
}
