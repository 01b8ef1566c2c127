//! Conversation room: one serialized control flow per open conversation.
//!
//! A room owns the [`ConversationView`] and the conversation subscription.
//! Sends, live events, backlog replays and conversation switches are all
//! applied by a single task, so the view is never mutated concurrently. The
//! UI observes it through [`RoomSnapshot`]s on a `watch` channel.

use std::sync::Arc;

use chat_core::{
    ChangeEvent, ChatBackend, ChatError, ConversationId, Message, MessageType, Scope, UserId,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SyncOptions;
use crate::sync::{Backlog, Subscription, SubscriptionState, SyncEvent};
use crate::view::{Applied, ConversationView, Entry, LocalId};

/// What the UI renders.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    /// The open conversation, if any.
    pub conversation_id: Option<ConversationId>,
    /// Confirmed messages in order, then pending sends.
    pub entries: Vec<Entry>,
    /// The feed gave up reconnecting; entries may be missing.
    pub stale: bool,
    pub state: SubscriptionState,
}

impl RoomSnapshot {
    fn empty() -> Self {
        Self {
            conversation_id: None,
            entries: Vec::new(),
            stale: false,
            state: SubscriptionState::Closed,
        }
    }

    /// Confirmed messages only.
    pub fn messages(&self) -> Vec<&Message> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::Confirmed(m) => Some(m),
                Entry::Pending(_) => None,
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }
}

enum Command {
    Send {
        content: String,
        message_type: MessageType,
        reply: oneshot::Sender<Result<Message, ChatError>>,
    },
    SwitchTo {
        conversation_id: ConversationId,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Resync {
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running room.
pub struct ConversationRoom {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<RoomSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl ConversationRoom {
    /// Open `conversation_id`: subscribe, load the backlog, mark it read.
    ///
    /// Resolves once the first backlog is shown. Fails loudly if the caller
    /// is not a participant.
    pub async fn open(
        backend: Arc<dyn ChatBackend>,
        conversation_id: ConversationId,
        options: SyncOptions,
    ) -> Result<Self, ChatError> {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(RoomSnapshot::empty());
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let actor = RoomActor {
            me: backend.user_id(),
            backend,
            options,
            current: None,
            opening: None,
            snapshot: snapshot_tx,
            done: done_tx,
        };
        let task = tokio::spawn(actor.run(commands_rx, done_rx));

        let room = Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            task: Some(task),
        };
        room.switch_to(conversation_id).await?;
        Ok(room)
    }

    /// Send a text message.
    pub async fn send(&self, content: &str) -> Result<Message, ChatError> {
        self.send_as(content, MessageType::Text).await
    }

    /// Send a message optimistically.
    ///
    /// A pending entry is shown at once and swapped for the confirmed message
    /// when the store answers. On failure or timeout the entry is removed and
    /// `SendFailed` is returned. Dropping the returned future does not stop
    /// reconciliation.
    pub async fn send_as(
        &self,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            content: content.to_string(),
            message_type,
            reply,
        })
        .await?;
        rx.await.map_err(|_| {
            ChatError::SendFailed("room closed before the send completed".to_string())
        })?
    }

    /// Tear down the current subscription, then open `conversation_id`.
    ///
    /// Events of the previous conversation are never applied afterwards.
    pub async fn switch_to(&self, conversation_id: ConversationId) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SwitchTo {
            conversation_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| closed())?
    }

    /// Resubscribe after the feed degraded, replaying the backlog.
    pub async fn resync(&self) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Resync { reply }).await?;
        rx.await.map_err(|_| closed())?
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Observe snapshots as they change.
    pub fn watch(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot.clone()
    }

    /// Close the room and its subscription.
    pub async fn close(mut self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    async fn command(&self, command: Command) -> Result<(), ChatError> {
        self.commands.send(command).await.map_err(|_| closed())
    }
}

impl Drop for ConversationRoom {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn closed() -> ChatError {
    ChatError::Transport("room closed".to_string())
}

struct SendDone {
    conversation_id: ConversationId,
    local_id: LocalId,
    result: Result<Message, ChatError>,
    reply: oneshot::Sender<Result<Message, ChatError>>,
}

struct Active {
    view: ConversationView,
    subscription: Subscription,
    events: mpsc::Receiver<SyncEvent>,
    state: watch::Receiver<SubscriptionState>,
}

struct RoomActor {
    backend: Arc<dyn ChatBackend>,
    me: UserId,
    options: SyncOptions,
    current: Option<Active>,
    opening: Option<oneshot::Sender<Result<(), ChatError>>>,
    snapshot: watch::Sender<RoomSnapshot>,
    done: mpsc::UnboundedSender<SendDone>,
}

impl RoomActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut done: mpsc::UnboundedReceiver<SendDone>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some(finished) = done.recv() => self.finish_send(finished),
                wake = next_wake(&mut self.current) => match wake {
                    Wake::Event(event) => self.on_sync_event(event),
                    Wake::State => self.publish(),
                },
            }
        }
        debug!("Room stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Send {
                content,
                message_type,
                reply,
            } => self.begin_send(content, message_type, reply),
            Command::SwitchTo {
                conversation_id,
                reply,
            } => {
                self.teardown().await;
                self.start(ConversationView::new(conversation_id), reply);
            }
            Command::Resync { reply } => match self.current.take() {
                Some(active) => {
                    let view = active.view;
                    active.subscription.close().await;
                    self.start(view, reply);
                }
                None => {
                    let err = ChatError::Transport("no conversation open".to_string());
                    let _ = reply.send(Err(err));
                }
            },
            Command::Close { .. } => {}
        }
    }

    /// Subscribe for `view`'s conversation; `reply` resolves on first backlog.
    fn start(&mut self, view: ConversationView, reply: oneshot::Sender<Result<(), ChatError>>) {
        let conversation_id = view.conversation_id();
        info!(conversation_id = %conversation_id, "Opening conversation");

        let (subscription, events) = Subscription::spawn(
            self.backend.clone(),
            Scope::Conversation(conversation_id),
            self.options.reconnect.clone(),
        );
        let state = subscription.watch_state();
        self.current = Some(Active {
            view,
            subscription,
            events,
            state,
        });

        if let Some(previous) = self.opening.replace(reply) {
            let _ = previous.send(Err(ChatError::SubscriptionDropped(
                "superseded by another conversation".to_string(),
            )));
        }
        self.publish();
    }

    /// Close the current subscription and wait for it, so none of its events
    /// can be applied later.
    async fn teardown(&mut self) {
        if let Some(active) = self.current.take() {
            debug!(conversation_id = %active.view.conversation_id(), "Closing conversation");
            active.subscription.close().await;
        }
        self.publish();
    }

    fn begin_send(
        &mut self,
        content: String,
        message_type: MessageType,
        reply: oneshot::Sender<Result<Message, ChatError>>,
    ) {
        let Some(active) = self.current.as_mut() else {
            let _ = reply.send(Err(ChatError::SendFailed("no conversation open".to_string())));
            return;
        };

        let conversation_id = active.view.conversation_id();
        let local_id = active.view.begin_send(self.me, content.clone(), message_type);
        debug!(conversation_id = %conversation_id, local_id = %local_id, "Pending send");
        self.publish();

        let backend = self.backend.clone();
        let done = self.done.clone();
        let timeout = self.options.send_timeout;
        tokio::spawn(async move {
            // The write runs on its own task: a timeout stops waiting for it
            // but never aborts it.
            let write = tokio::spawn(async move {
                backend
                    .append_message(conversation_id, &content, message_type)
                    .await
            });
            let result = match tokio::time::timeout(timeout, write).await {
                Ok(Ok(Ok(message))) => Ok(message),
                Ok(Ok(Err(err)))
                    if err.is_integrity() || matches!(err, ChatError::SendFailed(_)) =>
                {
                    Err(err)
                }
                Ok(Ok(Err(err))) => Err(ChatError::SendFailed(err.to_string())),
                Ok(Err(join_err)) => Err(ChatError::SendFailed(join_err.to_string())),
                Err(_) => Err(ChatError::send_timed_out(timeout)),
            };
            let _ = done.send(SendDone {
                conversation_id,
                local_id,
                result,
                reply,
            });
        });
    }

    fn finish_send(&mut self, finished: SendDone) {
        let SendDone {
            conversation_id,
            local_id,
            result,
            reply,
        } = finished;

        if let Some(active) = self
            .current
            .as_mut()
            .filter(|a| a.view.conversation_id() == conversation_id)
        {
            match &result {
                Ok(message) => {
                    active.view.confirm_send(local_id, message.clone());
                }
                Err(_) => {
                    active.view.fail_send(local_id);
                }
            }
            self.publish();
        }

        match &result {
            Ok(message) => debug!(message_id = %message.id, local_id = %local_id, "Send confirmed"),
            Err(err) => error!(
                conversation_id = %conversation_id,
                local_id = %local_id,
                "Send failed: {}",
                err
            ),
        }
        let _ = reply.send(result);
    }

    fn on_sync_event(&mut self, event: SyncEvent) {
        let me = self.me;
        let Some(active) = self.current.as_mut() else {
            return;
        };
        let conversation_id = active.view.conversation_id();

        // Resolved after publishing, so the caller sees the new snapshot.
        let mut opened = None;
        match event {
            SyncEvent::Resynced(Backlog::Messages(messages)) => {
                let inserted = active.view.merge_backlog(messages);
                debug!(conversation_id = %conversation_id, inserted, "Backlog merged");
                self.mark_read(conversation_id);
                opened = Some(Ok(()));
            }
            SyncEvent::Resynced(Backlog::Inbox(_)) => {
                warn!(conversation_id = %conversation_id, "Ignoring inbox backlog in a room");
            }
            SyncEvent::Change(ChangeEvent::MessageInserted { message }) => {
                let from_other = message.sender_id != me;
                if active.view.apply(message) == Applied::Inserted && from_other {
                    self.mark_read(conversation_id);
                }
            }
            SyncEvent::Change(other) => {
                debug!(kind = other.kind(), "Ignoring change in a room");
            }
            SyncEvent::Degraded { attempts } => {
                active.view.mark_stale();
                warn!(conversation_id = %conversation_id, attempts, "Conversation feed degraded");
                opened = Some(Err(ChatError::SubscriptionDropped(format!(
                    "gave up after {} attempts",
                    attempts
                ))));
            }
            SyncEvent::Failed(err) => {
                error!(
                    conversation_id = %conversation_id,
                    "Conversation subscription refused: {}", err
                );
                active.view.mark_stale();
                opened = Some(Err(err));
            }
        }
        self.publish();

        if let Some(result) = opened {
            if let Some(reply) = self.opening.take() {
                let _ = reply.send(result);
            }
        }
    }

    /// Fire-and-forget read marker update; the store ignores stale ones.
    fn mark_read(&self, conversation_id: ConversationId) {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.mark_conversation_read(conversation_id).await {
                warn!(
                    conversation_id = %conversation_id,
                    "Failed to mark conversation read: {}", err
                );
            }
        });
    }

    fn publish(&self) {
        let snapshot = match &self.current {
            Some(active) => RoomSnapshot {
                conversation_id: Some(active.view.conversation_id()),
                entries: active.view.entries(),
                stale: active.view.is_stale(),
                state: *active.state.borrow(),
            },
            None => RoomSnapshot::empty(),
        };
        self.snapshot.send_replace(snapshot);
    }
}

enum Wake {
    Event(SyncEvent),
    State,
}

/// Wait for the current subscription's next event or state change.
async fn next_wake(current: &mut Option<Active>) -> Wake {
    let Some(active) = current else {
        return std::future::pending().await;
    };
    tokio::select! {
        Some(event) = active.events.recv() => Wake::Event(event),
        Ok(()) = active.state.changed() => Wake::State,
        else => std::future::pending().await,
    }
}
