//! Ordered, deduplicated view of one conversation, with optimistic entries.

use std::collections::HashSet;
use std::fmt;

use chat_core::{ConversationId, Message, MessageId, MessageType, Timestamp, UserId};
use uuid::Uuid;

/// Client-only id of a pending message. Lives in its own namespace, so it can
/// never be mistaken for a server-assigned [`MessageId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(Uuid);

impl LocalId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// A locally authored message awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub local_id: LocalId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    /// Client clock; display only, never used for ordering.
    pub submitted_at: Timestamp,
}

/// One renderable entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Confirmed(Message),
    Pending(PendingMessage),
}

impl Entry {
    pub fn content(&self) -> &str {
        match self {
            Entry::Confirmed(m) => &m.content,
            Entry::Pending(p) => &p.content,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Entry::Pending(_))
    }
}

/// Outcome of applying a confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    /// Already present; nothing changed.
    Duplicate,
    /// Belongs to another conversation; ignored.
    WrongConversation,
}

/// Confirmed messages sorted by `(created_at, id)` followed by pending
/// entries in submit order.
///
/// Application is idempotent and order-independent: the same message applied
/// twice, or messages applied out of order, yield the same view.
#[derive(Debug, Clone)]
pub struct ConversationView {
    conversation_id: ConversationId,
    confirmed: Vec<Message>,
    known: HashSet<MessageId>,
    pending: Vec<PendingMessage>,
    stale: bool,
}

impl ConversationView {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            confirmed: Vec::new(),
            known: HashSet::new(),
            pending: Vec::new(),
            stale: false,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Insert a confirmed message at its ordered position.
    pub fn apply(&mut self, message: Message) -> Applied {
        if message.conversation_id != self.conversation_id {
            tracing::warn!(
                expected = %self.conversation_id,
                got = %message.conversation_id,
                message_id = %message.id,
                "Rejected message for another conversation"
            );
            return Applied::WrongConversation;
        }
        if !self.known.insert(message.id) {
            return Applied::Duplicate;
        }

        let key = message.order_key();
        let at = self
            .confirmed
            .partition_point(|existing| existing.order_key() < key);
        self.confirmed.insert(at, message);
        Applied::Inserted
    }

    /// Merge an authoritative backlog and clear the stale flag.
    ///
    /// Messages are never deleted, so merging the backlog into what is
    /// already shown is equivalent to replacing it.
    pub fn merge_backlog(&mut self, messages: Vec<Message>) -> usize {
        let mut inserted = 0;
        for message in messages {
            if self.apply(message) == Applied::Inserted {
                inserted += 1;
            }
        }
        self.stale = false;
        inserted
    }

    /// Add a pending entry for a message about to be sent.
    pub fn begin_send(
        &mut self,
        sender_id: UserId,
        content: impl Into<String>,
        message_type: MessageType,
    ) -> LocalId {
        let local_id = LocalId::new();
        self.pending.push(PendingMessage {
            local_id,
            conversation_id: self.conversation_id,
            sender_id,
            content: content.into(),
            message_type,
            submitted_at: chrono::Utc::now(),
        });
        local_id
    }

    /// Swap the pending entry `local_id` for the confirmed message.
    ///
    /// Matching is by local id, never by content. If the echo already
    /// delivered the message, only the pending entry is removed.
    pub fn confirm_send(&mut self, local_id: LocalId, message: Message) -> Applied {
        self.remove_pending(local_id);
        self.apply(message)
    }

    /// Drop the pending entry `local_id` after a failed send.
    pub fn fail_send(&mut self, local_id: LocalId) -> Option<PendingMessage> {
        self.remove_pending(local_id)
    }

    fn remove_pending(&mut self, local_id: LocalId) -> Option<PendingMessage> {
        let at = self.pending.iter().position(|p| p.local_id == local_id)?;
        Some(self.pending.remove(at))
    }

    pub fn messages(&self) -> &[Message] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    /// Everything to render, in display order.
    pub fn entries(&self) -> Vec<Entry> {
        self.confirmed
            .iter()
            .cloned()
            .map(Entry::Confirmed)
            .chain(self.pending.iter().cloned().map(Entry::Pending))
            .collect()
    }

    pub fn latest(&self) -> Option<&Message> {
        self.confirmed.last()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.known.contains(&id)
    }

    /// Whether the view may be missing messages (feed degraded).
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }
}
