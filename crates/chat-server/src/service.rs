//! The conversation service: store operations plus change publication.

use chat_core::{
    ChangeEvent, ChatError, ConversationId, ConversationSummary, MarkRead, Message, MessageType,
    Scope, UserId,
};
use database::{conversation, message, read_state, Database};
use tracing::{debug, info, warn};

use crate::backend::LocalBackend;
use crate::feed::{ChangeFeed, FeedSubscription};

type Result<T> = std::result::Result<T, ChatError>;

/// Server-side operations, each on behalf of an explicit caller.
///
/// Every successful write is published on the [`ChangeFeed`] after it is
/// committed, so subscribers only ever see persisted rows.
#[derive(Clone)]
pub struct ChatService {
    db: Database,
    feed: ChangeFeed,
}

impl ChatService {
    pub fn new(db: Database, feed: ChangeFeed) -> Self {
        Self { db, feed }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// A [`chat_core::ChatBackend`] acting as `user_id`.
    pub fn backend_for(&self, user_id: UserId) -> LocalBackend {
        LocalBackend::new(self.clone(), user_id)
    }

    pub async fn create_or_get_conversation(
        &self,
        caller: UserId,
        other: UserId,
    ) -> Result<ConversationId> {
        let registration = conversation::get_or_create(&self.db, caller, other).await?;

        if registration.created {
            let audience: Vec<UserId> =
                registration.participants.iter().map(|p| p.user_id).collect();
            self.feed.publish(
                &ChangeEvent::ConversationCreated {
                    conversation: registration.conversation.clone(),
                    participants: registration.participants,
                },
                &audience,
            );
        }

        Ok(registration.conversation.id)
    }

    pub async fn append_message(
        &self,
        caller: UserId,
        conversation_id: ConversationId,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let message =
            message::append_message(&self.db, conversation_id, caller, content, message_type)
                .await?;
        let audience = self.audience(conversation_id).await?;
        self.feed.publish(
            &ChangeEvent::MessageInserted {
                message: message.clone(),
            },
            &audience,
        );
        Ok(message)
    }

    pub async fn list_messages(
        &self,
        caller: UserId,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>> {
        conversation::ensure_participant(self.db.pool(), conversation_id, caller).await?;
        Ok(message::list_messages(self.db.pool(), conversation_id).await?)
    }

    pub async fn mark_conversation_read(
        &self,
        caller: UserId,
        conversation_id: ConversationId,
    ) -> Result<MarkRead> {
        let outcome = read_state::mark_read(&self.db, conversation_id, caller).await?;
        match &outcome {
            MarkRead::Advanced(participant) => {
                self.feed.publish(
                    &ChangeEvent::ParticipantUpdated {
                        participant: participant.clone(),
                    },
                    &[caller],
                );
            }
            MarkRead::Stale(_) => {
                debug!(
                    conversation_id = %conversation_id,
                    user_id = %caller,
                    "Stale read marker ignored"
                );
            }
        }
        Ok(outcome)
    }

    pub async fn is_unread(&self, caller: UserId, conversation_id: ConversationId) -> Result<bool> {
        Ok(read_state::is_unread(self.db.pool(), conversation_id, caller).await?)
    }

    pub async fn get_unread_count(&self, caller: UserId) -> Result<u64> {
        Ok(read_state::unread_count(self.db.pool(), caller).await?)
    }

    pub async fn list_conversations(&self, caller: UserId) -> Result<Vec<ConversationSummary>> {
        Ok(conversation::list_conversations(self.db.pool(), caller).await?)
    }

    /// Register a change-feed subscription for `caller`.
    ///
    /// Conversation scopes require membership; user scopes must name the
    /// caller. The subscription is live when this returns.
    pub async fn subscribe(&self, caller: UserId, scope: Scope) -> Result<FeedSubscription> {
        match scope {
            Scope::Conversation(conversation_id) => {
                conversation::ensure_participant(self.db.pool(), conversation_id, caller).await?;
            }
            Scope::User(user_id) if user_id != caller => {
                warn!(caller = %caller, %scope, "Rejected subscription to another user's feed");
                return Err(ChatError::unauthorized(caller, scope));
            }
            Scope::User(_) => {}
        }

        info!(caller = %caller, %scope, "Opening subscription");
        Ok(self.feed.subscribe(scope))
    }

    async fn audience(&self, conversation_id: ConversationId) -> Result<Vec<UserId>> {
        let participants = conversation::list_participants(self.db.pool(), conversation_id).await?;
        Ok(participants.into_iter().map(|p| p.user_id).collect())
    }
}
