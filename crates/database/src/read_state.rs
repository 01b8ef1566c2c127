//! Read State: per-participant read markers and unread computation.

use chat_core::{ConversationId, MarkRead, Participant, Timestamp, UserId};
use sqlx::SqlitePool;

use crate::conversation::get_participant;
use crate::error::Result;
use crate::message::latest_message;
use crate::models::{timestamp_to_micros, ParticipantRow};
use crate::Database;

/// Mark the conversation read for `user_id` as of now.
pub async fn mark_read(
    db: &Database,
    conversation_id: ConversationId,
    user_id: UserId,
) -> Result<MarkRead> {
    let at = db.clock().now();
    mark_read_at(db.pool(), conversation_id, user_id, at).await
}

/// Move the read marker of `user_id` to `at`.
///
/// The marker never moves backwards: if the stored value is already at or
/// past `at`, nothing is written and the current row comes back as
/// [`MarkRead::Stale`]. Non-members get `Unauthorized`.
pub async fn mark_read_at(
    pool: &SqlitePool,
    conversation_id: ConversationId,
    user_id: UserId,
    at: Timestamp,
) -> Result<MarkRead> {
    let updated = sqlx::query_as::<_, ParticipantRow>(
        r#"
        UPDATE conversation_participants
        SET last_read_at = ?1
        WHERE conversation_id = ?2 AND user_id = ?3 AND last_read_at < ?1
        RETURNING conversation_id, user_id, last_read_at
        "#,
    )
    .bind(timestamp_to_micros(at))
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    match updated {
        Some(row) => {
            let participant = Participant::try_from(row)?;
            tracing::debug!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                "Advanced read marker"
            );
            Ok(MarkRead::Advanced(participant))
        }
        None => {
            let current = get_participant(pool, conversation_id, user_id).await?;
            tracing::debug!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                "Read marker already newer, ignoring"
            );
            Ok(MarkRead::Stale(current))
        }
    }
}

/// Whether the conversation has a message from the other participant that
/// `user_id` has not read.
pub async fn is_unread(
    pool: &SqlitePool,
    conversation_id: ConversationId,
    user_id: UserId,
) -> Result<bool> {
    let participant = get_participant(pool, conversation_id, user_id).await?;
    let latest = latest_message(pool, conversation_id).await?;
    Ok(chat_core::is_unread(
        user_id,
        participant.last_read_at,
        latest.as_ref(),
    ))
}

/// Number of conversations of `user_id` that are unread.
pub async fn unread_count(pool: &SqlitePool, user_id: UserId) -> Result<u64> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM conversation_participants p
        JOIN messages m ON m.id = (
            SELECT id FROM messages
            WHERE conversation_id = p.conversation_id
            ORDER BY created_at DESC, id DESC
            LIMIT 1
        )
        WHERE p.user_id = ?1
          AND m.sender_id != ?1
          AND m.created_at > p.last_read_at
        "#,
    )
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count.max(0) as u64)
}
