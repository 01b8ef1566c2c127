//! Conversation Registry: unique two-party conversations and membership.

use chat_core::{Conversation, ConversationId, ConversationSummary, Participant, UserId};
use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::{ConversationRow, InboxRow, ParticipantRow};
use crate::Database;

/// Result of [`get_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub conversation: Conversation,
    /// Both membership rows.
    pub participants: Vec<Participant>,
    /// Whether this call created the conversation.
    pub created: bool,
}

/// Normalize an unordered pair into its storage key.
fn pair_key(a: UserId, b: UserId) -> (String, String) {
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    (low.to_string(), high.to_string())
}

/// Return the conversation between `a` and `b`, creating it if needed.
///
/// Creation is a single `INSERT` keyed on the normalized pair; a trigger
/// writes both membership rows (with `last_read_at` at the creation time) in
/// the same statement. Concurrent calls for the same pair, in either order,
/// all observe one conversation.
pub async fn get_or_create(db: &Database, a: UserId, b: UserId) -> Result<Registration> {
    if a == b {
        return Err(DatabaseError::InvalidParticipants { user_id: a });
    }

    let (low, high) = pair_key(a, b);

    let created = sqlx::query(
        r#"
        INSERT INTO conversations (id, user_low, user_high, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_low, user_high) DO NOTHING
        "#,
    )
    .bind(ConversationId::new().to_string())
    .bind(&low)
    .bind(&high)
    .bind(db.clock().now_micros())
    .execute(db.pool())
    .await?
    .rows_affected()
        == 1;

    let conversation: Conversation = sqlx::query_as::<_, ConversationRow>(
        r#"
        SELECT id, created_at
        FROM conversations
        WHERE user_low = ? AND user_high = ?
        "#,
    )
    .bind(&low)
    .bind(&high)
    .fetch_one(db.pool())
    .await?
    .try_into()?;

    if created {
        tracing::info!(conversation_id = %conversation.id, "Created conversation");
    } else {
        tracing::debug!(conversation_id = %conversation.id, "Reusing existing conversation");
    }

    let participants = list_participants(db.pool(), conversation.id).await?;

    Ok(Registration {
        conversation,
        participants,
        created,
    })
}

/// Get a conversation by ID.
pub async fn get_conversation(pool: &SqlitePool, id: ConversationId) -> Result<Conversation> {
    sqlx::query_as::<_, ConversationRow>(
        r#"
        SELECT id, created_at
        FROM conversations
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "Conversation",
        id: id.to_string(),
    })?
    .try_into()
}

/// List the membership rows of a conversation.
pub async fn list_participants(pool: &SqlitePool, id: ConversationId) -> Result<Vec<Participant>> {
    let rows = sqlx::query_as::<_, ParticipantRow>(
        r#"
        SELECT conversation_id, user_id, last_read_at
        FROM conversation_participants
        WHERE conversation_id = ?
        ORDER BY user_id
        "#,
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Participant::try_from).collect()
}

/// Get one membership row, failing with `Unauthorized` for non-members.
pub async fn get_participant(
    pool: &SqlitePool,
    conversation_id: ConversationId,
    user_id: UserId,
) -> Result<Participant> {
    sqlx::query_as::<_, ParticipantRow>(
        r#"
        SELECT conversation_id, user_id, last_read_at
        FROM conversation_participants
        WHERE conversation_id = ? AND user_id = ?
        "#,
    )
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or(DatabaseError::Unauthorized {
        user_id,
        conversation_id,
    })?
    .try_into()
}

/// Fail with `Unauthorized` unless `user_id` is a member of the conversation.
pub async fn ensure_participant(
    pool: &SqlitePool,
    conversation_id: ConversationId,
    user_id: UserId,
) -> Result<()> {
    get_participant(pool, conversation_id, user_id).await.map(|_| ())
}

/// The conversation list of `user_id`, most recent activity first.
///
/// One query: the viewer's membership, the other participant and the latest
/// message by `(created_at, id)`.
pub async fn list_conversations(
    pool: &SqlitePool,
    user_id: UserId,
) -> Result<Vec<ConversationSummary>> {
    let rows = sqlx::query_as::<_, InboxRow>(
        r#"
        SELECT
            p.conversation_id AS conversation_id,
            c.created_at AS conversation_created_at,
            p.last_read_at AS last_read_at,
            o.user_id AS other_user_id,
            m.id AS message_id,
            m.sender_id AS sender_id,
            m.content AS content,
            m.message_type AS message_type,
            m.created_at AS message_created_at
        FROM conversation_participants p
        JOIN conversations c ON c.id = p.conversation_id
        JOIN conversation_participants o
            ON o.conversation_id = p.conversation_id AND o.user_id != p.user_id
        LEFT JOIN messages m ON m.id = (
            SELECT id FROM messages
            WHERE conversation_id = p.conversation_id
            ORDER BY created_at DESC, id DESC
            LIMIT 1
        )
        WHERE p.user_id = ?
        ORDER BY COALESCE(m.created_at, c.created_at) DESC, p.conversation_id
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|row| row.into_summary(user_id)).collect()
}

/// Count conversations (all users).
pub async fn count_conversations(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM conversations
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(count)
}
