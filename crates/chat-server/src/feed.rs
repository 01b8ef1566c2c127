//! In-process change feed: routes change events to scoped subscribers.
//!
//! Every subscriber owns a bounded buffer. A subscriber that cannot keep up
//! is dropped instead of losing events silently; its stream ends and the
//! client recovers through reconnect and backlog replay.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use chat_core::{ChangeEvent, Scope, UserId};
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default number of buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

struct Subscriber {
    scope: Scope,
    tx: mpsc::Sender<ChangeEvent>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// Fan-out hub for [`ChangeEvent`]s.
#[derive(Clone)]
pub struct ChangeFeed {
    registry: Arc<Mutex<Registry>>,
    capacity: usize,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeFeed {
    /// Create a feed buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a subscriber. Events published after this call returns are
    /// delivered to it.
    pub fn subscribe(&self, scope: Scope) -> FeedSubscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(id, Subscriber { scope, tx });
        info!(subscriber = id, %scope, "Subscriber registered");

        FeedSubscription {
            id,
            scope,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every matching subscriber.
    ///
    /// `audience` is the set of users the event concerns (the conversation's
    /// participants); user-scoped subscribers outside it never see it.
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: &ChangeEvent, audience: &[UserId]) -> usize {
        let mut registry = self.lock();
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for (id, subscriber) in registry.subscribers.iter() {
            if !matches(subscriber.scope, event, audience) {
                continue;
            }
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscriber = *id,
                        scope = %subscriber.scope,
                        "Subscriber fell behind, dropping it"
                    );
                    dropped.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(*id),
            }
        }

        for id in dropped {
            registry.subscribers.remove(&id);
        }

        debug!(
            kind = event.kind(),
            conversation_id = %event.conversation_id(),
            delivered,
            "Published change"
        );
        delivered
    }

    /// Drop every subscriber. Their streams end once drained.
    pub fn disconnect_all(&self) -> usize {
        let mut registry = self.lock();
        let count = registry.subscribers.len();
        registry.subscribers.clear();
        if count > 0 {
            warn!(count, "Disconnected all subscribers");
        }
        count
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

fn matches(scope: Scope, event: &ChangeEvent, audience: &[UserId]) -> bool {
    match (scope, event) {
        (Scope::Conversation(id), ChangeEvent::MessageInserted { message }) => {
            message.conversation_id == id
        }
        (Scope::Conversation(_), _) => false,
        (Scope::User(user), ChangeEvent::ParticipantUpdated { participant }) => {
            participant.user_id == user
        }
        (Scope::User(user), _) => audience.contains(&user),
    }
}

/// A live registration on a [`ChangeFeed`]. Unregisters on drop.
pub struct FeedSubscription {
    id: u64,
    scope: Scope,
    rx: mpsc::Receiver<ChangeEvent>,
    registry: std::sync::Weak<Mutex<Registry>>,
}

impl FeedSubscription {
    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl Stream for FeedSubscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if registry.subscribers.remove(&self.id).is_some() {
                debug!(subscriber = self.id, scope = %self.scope, "Subscriber closed");
            }
        }
    }
}
