//! Unread aggregator: one live badge across all of a user's conversations.
//!
//! [`UnreadMap`] keeps, per conversation, the caller's read marker and the
//! latest message, and derives `is_unread` with the same rule as the store.
//! [`UnreadAggregator`] feeds it from the user-scoped change feed and
//! publishes an [`UnreadBadge`] on a `watch` channel, which any number of UI
//! surfaces can observe at once. A periodic full refresh runs only while the
//! feed is degraded.

use std::collections::HashMap;
use std::sync::Arc;

use chat_core::{
    ChangeEvent, ChatBackend, ChatError, ConversationId, ConversationSummary, MarkRead, Message,
    Participant, Scope, Timestamp, UserId,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SyncOptions;
use crate::sync::{Backlog, Subscription, SyncEvent};

#[derive(Debug, Clone)]
struct UnreadEntry {
    last_read_at: Timestamp,
    latest: Option<Message>,
}

impl UnreadEntry {
    fn is_unread(&self, viewer: UserId) -> bool {
        chat_core::is_unread(viewer, self.last_read_at, self.latest.as_ref())
    }
}

/// Result of applying a change to an [`UnreadMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapUpdate {
    Changed,
    Unchanged,
    /// The change names a conversation the map has never seen; a full
    /// refresh is needed to learn the caller's read marker.
    Unknown(ConversationId),
}

/// `conversation -> is_unread` for one viewer.
#[derive(Debug, Clone)]
pub struct UnreadMap {
    viewer: UserId,
    entries: HashMap<ConversationId, UnreadEntry>,
}

impl UnreadMap {
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            entries: HashMap::new(),
        }
    }

    /// Replace everything with an authoritative conversation list.
    pub fn replace_all(&mut self, summaries: Vec<ConversationSummary>) {
        self.entries = summaries
            .into_iter()
            .map(|s| {
                (
                    s.conversation_id,
                    UnreadEntry {
                        last_read_at: s.last_read_at,
                        latest: s.last_message,
                    },
                )
            })
            .collect();
    }

    /// Fold a change event into the map.
    pub fn apply(&mut self, change: &ChangeEvent) -> MapUpdate {
        match change {
            ChangeEvent::MessageInserted { message } => self.apply_message(message),
            ChangeEvent::ParticipantUpdated { participant } => self.apply_marker(participant),
            ChangeEvent::ConversationCreated {
                conversation,
                participants,
            } => {
                if self.entries.contains_key(&conversation.id) {
                    return MapUpdate::Unchanged;
                }
                let Some(own) = participants.iter().find(|p| p.user_id == self.viewer) else {
                    return MapUpdate::Unknown(conversation.id);
                };
                self.entries.insert(
                    conversation.id,
                    UnreadEntry {
                        last_read_at: own.last_read_at,
                        latest: None,
                    },
                );
                MapUpdate::Changed
            }
        }
    }

    fn apply_message(&mut self, message: &Message) -> MapUpdate {
        let viewer = self.viewer;
        let Some(entry) = self.entries.get_mut(&message.conversation_id) else {
            return MapUpdate::Unknown(message.conversation_id);
        };
        if entry.latest.as_ref().is_some_and(|latest| !message.is_newer_than(latest)) {
            return MapUpdate::Unchanged;
        }
        let before = entry.is_unread(viewer);
        entry.latest = Some(message.clone());
        changed(before, entry.is_unread(viewer))
    }

    /// Advance the viewer's own read marker; older markers are ignored.
    pub fn apply_marker(&mut self, participant: &Participant) -> MapUpdate {
        if participant.user_id != self.viewer {
            return MapUpdate::Unchanged;
        }
        let viewer = self.viewer;
        let Some(entry) = self.entries.get_mut(&participant.conversation_id) else {
            return MapUpdate::Unknown(participant.conversation_id);
        };
        if participant.last_read_at <= entry.last_read_at {
            return MapUpdate::Unchanged;
        }
        let before = entry.is_unread(viewer);
        entry.last_read_at = participant.last_read_at;
        changed(before, entry.is_unread(viewer))
    }

    pub fn is_unread(&self, conversation_id: ConversationId) -> bool {
        self.entries
            .get(&conversation_id)
            .is_some_and(|e| e.is_unread(self.viewer))
    }

    /// Number of unread conversations.
    pub fn count(&self) -> u64 {
        self.entries
            .values()
            .filter(|e| e.is_unread(self.viewer))
            .count() as u64
    }

    pub fn any_unread(&self) -> bool {
        self.entries.values().any(|e| e.is_unread(self.viewer))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn changed(before: bool, after: bool) -> MapUpdate {
    if before == after {
        MapUpdate::Unchanged
    } else {
        MapUpdate::Changed
    }
}

/// What badges render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnreadBadge {
    /// Number of conversations with unread activity.
    pub count: u64,
    /// The live feed is degraded; the count comes from periodic refreshes.
    pub stale: bool,
    /// Whether at least one authoritative refresh has completed.
    pub loaded: bool,
}

impl UnreadBadge {
    pub fn has_unread(&self) -> bool {
        self.count > 0
    }
}

enum Command {
    MarkRead {
        conversation_id: ConversationId,
        reply: oneshot::Sender<Result<MarkRead, ChatError>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<u64, ChatError>>,
    },
    IsUnread {
        conversation_id: ConversationId,
        reply: oneshot::Sender<bool>,
    },
}

/// Handle to the aggregator task.
#[derive(Clone)]
pub struct UnreadAggregator {
    commands: mpsc::Sender<Command>,
    badge: watch::Receiver<UnreadBadge>,
    task: Arc<AggregatorTask>,
}

struct AggregatorTask {
    shutdown: watch::Sender<bool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for AggregatorTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        let handle = self
            .handle
            .get_mut()
            .map(Option::take)
            .unwrap_or_else(|poisoned| poisoned.into_inner().take());
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl UnreadAggregator {
    /// Start aggregating for the backend's user.
    pub fn spawn(backend: Arc<dyn ChatBackend>, options: SyncOptions) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (badge_tx, badge_rx) = watch::channel(UnreadBadge::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = AggregatorWorker {
            map: UnreadMap::new(backend.user_id()),
            backend,
            options,
            badge: badge_tx,
            stale: false,
            loaded: false,
        };
        let handle = tokio::spawn(worker.run(commands_rx, shutdown_rx));

        Self {
            commands: commands_tx,
            badge: badge_rx,
            task: Arc::new(AggregatorTask {
                shutdown: shutdown_tx,
                handle: std::sync::Mutex::new(Some(handle)),
            }),
        }
    }

    /// The current badge.
    pub fn badge(&self) -> UnreadBadge {
        *self.badge.borrow()
    }

    /// A receiver for one UI surface. Every receiver sees every update.
    pub fn watch(&self) -> watch::Receiver<UnreadBadge> {
        self.badge.clone()
    }

    /// Mark a conversation read and update the badge without waiting for
    /// the feed to echo the marker.
    pub async fn mark_read(&self, conversation_id: ConversationId) -> Result<MarkRead, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::MarkRead {
            conversation_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Force a full refresh from the server; returns the new count.
    pub async fn refresh(&self) -> Result<u64, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Refresh { reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Whether the aggregator currently considers `conversation_id` unread.
    pub async fn is_unread(&self, conversation_id: ConversationId) -> Result<bool, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::IsUnread {
            conversation_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| stopped())
    }

    /// Stop the aggregator and wait for it.
    pub async fn shutdown(&self) {
        let _ = self.task.shutdown.send(true);
        let handle = self
            .task
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn command(&self, command: Command) -> Result<(), ChatError> {
        self.commands.send(command).await.map_err(|_| stopped())
    }
}

fn stopped() -> ChatError {
    ChatError::Transport("unread aggregator stopped".to_string())
}

struct AggregatorWorker {
    backend: Arc<dyn ChatBackend>,
    options: SyncOptions,
    map: UnreadMap,
    badge: watch::Sender<UnreadBadge>,
    stale: bool,
    loaded: bool,
}

impl AggregatorWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let scope = Scope::User(self.map.viewer);
        let (mut subscription, mut events) =
            Subscription::spawn(self.backend.clone(), scope, self.options.reconnect.clone());
        let mut fallback = tokio::time::interval(self.options.fallback_poll_interval);
        fallback.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Set once the current subscription has given up; cleared on resubscribe.
        let mut degraded = false;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                event = events.recv(), if !degraded => match event {
                    Some(event) => {
                        if matches!(event, SyncEvent::Degraded { .. } | SyncEvent::Failed(_)) {
                            degraded = true;
                        }
                        self.on_sync_event(event).await;
                    }
                    None => {
                        degraded = true;
                        self.stale = true;
                        self.publish();
                    }
                },
                _ = fallback.tick(), if self.stale => {
                    info!("Feed degraded, refreshing unread state");
                    if self.refresh().await.is_ok() && degraded {
                        // Try the live feed again; polling continues until it resyncs.
                        subscription.close().await;
                        let (next, next_events) = Subscription::spawn(
                            self.backend.clone(),
                            scope,
                            self.options.reconnect.clone(),
                        );
                        subscription = next;
                        events = next_events;
                        degraded = false;
                    }
                }
            }
        }

        subscription.close().await;
        debug!("Unread aggregator stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::MarkRead {
                conversation_id,
                reply,
            } => {
                let result = self.backend.mark_conversation_read(conversation_id).await;
                match &result {
                    Ok(outcome) => {
                        if self.map.apply_marker(outcome.participant()) == MapUpdate::Changed {
                            self.publish();
                        }
                    }
                    Err(err) => {
                        warn!(conversation_id = %conversation_id, "Mark read failed: {}", err)
                    }
                }
                let _ = reply.send(result);
            }
            Command::Refresh { reply } => {
                let _ = reply.send(self.refresh().await);
            }
            Command::IsUnread {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.map.is_unread(conversation_id));
            }
        }
    }

    async fn on_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Resynced(Backlog::Inbox(summaries)) => {
                self.map.replace_all(summaries);
                self.stale = false;
                self.loaded = true;
                debug!(conversations = self.map.len(), "Unread state resynced");
                self.publish();
            }
            SyncEvent::Resynced(Backlog::Messages(_)) => {
                warn!("Ignoring message backlog on a user feed");
            }
            SyncEvent::Change(change) => match self.map.apply(&change) {
                MapUpdate::Changed => self.publish(),
                MapUpdate::Unchanged => {}
                MapUpdate::Unknown(conversation_id) => {
                    debug!(
                        conversation_id = %conversation_id,
                        "Change for unknown conversation, refreshing"
                    );
                    let _ = self.refresh().await;
                }
            },
            SyncEvent::Degraded { attempts } => {
                warn!(attempts, "Unread feed degraded, falling back to polling");
                self.stale = true;
                self.publish();
            }
            SyncEvent::Failed(err) => {
                error!("Unread feed refused: {}", err);
                self.stale = true;
                self.publish();
            }
        }
    }

    /// One full refresh from the conversation list.
    async fn refresh(&mut self) -> Result<u64, ChatError> {
        match self.backend.list_conversations().await {
            Ok(summaries) => {
                self.map.replace_all(summaries);
                self.loaded = true;
                self.publish();
                Ok(self.map.count())
            }
            Err(err) => {
                warn!("Unread refresh failed: {}", err);
                Err(err)
            }
        }
    }

    fn publish(&self) {
        let badge = UnreadBadge {
            count: self.map.count(),
            stale: self.stale,
            loaded: self.loaded,
        };
        self.badge.send_if_modified(|current| {
            if *current == badge {
                false
            } else {
                *current = badge;
                true
            }
        });
    }
}
