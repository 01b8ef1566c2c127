//! Realtime change events and subscription scopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, ParseIdError, UserId};
use crate::message::{Conversation, Message, Participant};

/// A change pushed by the server to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A message row was inserted.
    MessageInserted { message: Message },
    /// A participant row was updated (read marker moved).
    ParticipantUpdated { participant: Participant },
    /// A conversation was created together with its two membership rows.
    ConversationCreated {
        conversation: Conversation,
        participants: Vec<Participant>,
    },
}

impl ChangeEvent {
    /// The conversation this event belongs to.
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            ChangeEvent::MessageInserted { message } => message.conversation_id,
            ChangeEvent::ParticipantUpdated { participant } => participant.conversation_id,
            ChangeEvent::ConversationCreated { conversation, .. } => conversation.id,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::MessageInserted { .. } => "message_inserted",
            ChangeEvent::ParticipantUpdated { .. } => "participant_updated",
            ChangeEvent::ConversationCreated { .. } => "conversation_created",
        }
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Message inserts of a single conversation.
    Conversation(ConversationId),
    /// Everything relevant to one user's unread state: inserts in any of
    /// their conversations, their own marker updates, and new conversations.
    User(UserId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Conversation(id) => write!(f, "conversation:{}", id),
            Scope::User(id) => write!(f, "user:{}", id),
        }
    }
}

impl FromStr for Scope {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseIdError {
            kind: "scope",
            value: s.to_string(),
        };
        let (kind, id) = s.split_once(':').ok_or_else(invalid)?;
        match kind {
            "conversation" => Ok(Scope::Conversation(id.parse()?)),
            "user" => Ok(Scope::User(id.parse()?)),
            _ => Err(invalid()),
        }
    }
}
