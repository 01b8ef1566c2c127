//! The backend trait a client session talks to.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ChatError;
use crate::event::{ChangeEvent, Scope};
use crate::ids::{ConversationId, UserId};
use crate::message::{ConversationSummary, MarkRead, Message, MessageType};

/// A live feed of change events. The stream ends when the server drops the
/// subscription.
pub type EventStream = BoxStream<'static, Result<ChangeEvent, ChatError>>;

/// The server-side operation surface, bound to one caller identity.
///
/// Every call is scoped to [`ChatBackend::user_id`]: the caller is the sender
/// of appended messages and the owner of the read marker being moved.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Identity of the session this backend acts for.
    fn user_id(&self) -> UserId;

    /// Return the unique conversation between the caller and `other`,
    /// creating it atomically if needed.
    async fn create_or_get_conversation(&self, other: UserId) -> Result<ConversationId, ChatError>;

    /// Persist a message from the caller. The store assigns id and time.
    async fn append_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message, ChatError>;

    /// All messages of a conversation in `(created_at, id)` order.
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ChatError>;

    /// Move the caller's read marker to now.
    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<MarkRead, ChatError>;

    /// Whether the conversation has unread activity for the caller.
    async fn is_unread(&self, conversation_id: ConversationId) -> Result<bool, ChatError>;

    /// Number of the caller's conversations with unread activity.
    async fn get_unread_count(&self) -> Result<u64, ChatError>;

    /// The caller's conversation list, most recent activity first.
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChatError>;

    /// Open a realtime feed. Resolves once the server has registered the
    /// subscription, so anything persisted afterwards will be delivered.
    async fn subscribe(&self, scope: Scope) -> Result<EventStream, ChatError>;
}
