//! A signed-in user's chat session.

use std::sync::Arc;

use chat_core::{ChatBackend, ChatError, ConversationId, ConversationSummary, UserId};
use tracing::info;

use crate::client::HttpBackend;
use crate::config::{ClientConfig, SyncOptions};
use crate::room::ConversationRoom;
use crate::unread::UnreadAggregator;

/// Ties a backend to the user's unread aggregator and opens rooms.
///
/// The aggregator starts with the session, so every badge shares one live
/// count.
#[derive(Clone)]
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    options: SyncOptions,
    unread: UnreadAggregator,
}

impl ChatSession {
    /// Start a session over any backend.
    pub fn new(backend: Arc<dyn ChatBackend>, options: SyncOptions) -> Self {
        let unread = UnreadAggregator::spawn(backend.clone(), options.clone());
        info!(user_id = %backend.user_id(), "Chat session started");
        Self {
            backend,
            options,
            unread,
        }
    }

    /// Connect to a server over HTTP and start a session.
    pub async fn connect(config: ClientConfig) -> Result<Self, ChatError> {
        let options = config.sync_options();
        let backend = HttpBackend::connect(config).await?;
        Ok(Self::new(Arc::new(backend), options))
    }

    pub fn user_id(&self) -> UserId {
        self.backend.user_id()
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    /// The conversation with `other`, created on first contact.
    pub async fn start_conversation(&self, other: UserId) -> Result<ConversationId, ChatError> {
        self.backend.create_or_get_conversation(other).await
    }

    /// Open a room on `conversation_id`. Opening marks it read.
    pub async fn open(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationRoom, ChatError> {
        ConversationRoom::open(self.backend.clone(), conversation_id, self.options.clone()).await
    }

    /// The conversation list, most recent activity first.
    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        self.backend.list_conversations().await
    }

    /// Server-side unread count, bypassing the aggregator.
    pub async fn unread_count(&self) -> Result<u64, ChatError> {
        self.backend.get_unread_count().await
    }

    /// The live unread aggregator.
    pub fn unread(&self) -> &UnreadAggregator {
        &self.unread
    }

    /// Stop the aggregator. Open rooms are closed by their owners.
    pub async fn close(&self) {
        self.unread.shutdown().await;
        info!(user_id = %self.backend.user_id(), "Chat session closed");
    }
}
