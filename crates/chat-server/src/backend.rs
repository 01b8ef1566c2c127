//! In-process [`ChatBackend`] bound to one caller identity.

use async_trait::async_trait;
use chat_core::{
    ChatBackend, ChatError, ConversationId, ConversationSummary, EventStream, MarkRead, Message,
    MessageType, Scope, UserId,
};
use futures::StreamExt;

use crate::service::ChatService;

/// Talks to a [`ChatService`] directly, without HTTP.
///
/// Used when the client and server share a process, and by tests.
#[derive(Clone)]
pub struct LocalBackend {
    service: ChatService,
    user_id: UserId,
}

impl LocalBackend {
    pub fn new(service: ChatService, user_id: UserId) -> Self {
        Self { service, user_id }
    }

    pub fn service(&self) -> &ChatService {
        &self.service
    }
}

#[async_trait]
impl ChatBackend for LocalBackend {
    fn user_id(&self) -> UserId {
        self.user_id
    }

    async fn create_or_get_conversation(&self, other: UserId) -> Result<ConversationId, ChatError> {
        self.service.create_or_get_conversation(self.user_id, other).await
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message, ChatError> {
        self.service
            .append_message(self.user_id, conversation_id, content, message_type)
            .await
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ChatError> {
        self.service.list_messages(self.user_id, conversation_id).await
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<MarkRead, ChatError> {
        self.service
            .mark_conversation_read(self.user_id, conversation_id)
            .await
    }

    async fn is_unread(&self, conversation_id: ConversationId) -> Result<bool, ChatError> {
        self.service.is_unread(self.user_id, conversation_id).await
    }

    async fn get_unread_count(&self) -> Result<u64, ChatError> {
        self.service.get_unread_count(self.user_id).await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        self.service.list_conversations(self.user_id).await
    }

    async fn subscribe(&self, scope: Scope) -> Result<EventStream, ChatError> {
        let subscription = self.service.subscribe(self.user_id, scope).await?;
        Ok(subscription.map(Ok).boxed())
    }
}
