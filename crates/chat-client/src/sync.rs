//! Realtime sync engine: one supervised subscription per scope.
//!
//! A [`Subscription`] runs a background task that opens the change feed,
//! fetches the authoritative backlog once the feed is live, forwards change
//! events, and reconnects with bounded exponential backoff when the feed
//! drops. State moves `Connecting -> Subscribed -> (Disconnected ->
//! Connecting)*` and ends in `Closed` after [`Subscription::close`].

use std::sync::Arc;
use std::time::Duration;

use chat_core::{ChangeEvent, ChatBackend, ChatError, ConversationSummary, Message, Scope};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of retries (None = infinite).
    pub max_retries: Option<u32>,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier for each retry.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(8),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }

    /// Check if we should retry after the given number of attempts.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.max_retries.map_or(true, |max| attempts < max)
    }
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Subscribed,
    Disconnected,
    Closed,
}

/// Authoritative state fetched after every (re)subscribe.
#[derive(Debug, Clone, PartialEq)]
pub enum Backlog {
    /// Full message list of a conversation scope.
    Messages(Vec<Message>),
    /// Conversation list of a user scope.
    Inbox(Vec<ConversationSummary>),
}

/// What a subscription reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A live change.
    Change(ChangeEvent),
    /// The feed is live and this is the state as of that moment.
    Resynced(Backlog),
    /// The retry budget ran out; local state may be stale.
    Degraded { attempts: u32 },
    /// The server refused the subscription for a reason retrying cannot fix.
    Failed(ChatError),
}

/// Handle to a running subscription task.
pub struct Subscription {
    scope: Scope,
    state: watch::Receiver<SubscriptionState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Start a subscription. Events arrive on the returned receiver.
    pub fn spawn(
        backend: Arc<dyn ChatBackend>,
        scope: Scope,
        reconnect: ReconnectConfig,
    ) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            backend,
            scope,
            reconnect,
            events: events_tx,
            state: state_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        (
            Self {
                scope,
                state: state_rx,
                shutdown: shutdown_tx,
                task: Some(task),
            },
            events_rx,
        )
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Observe lifecycle changes.
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    /// Tear the subscription down and wait for its task to finish.
    ///
    /// No event from this subscription is sent after this returns.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(scope = %self.scope, "Subscription task ended abnormally: {}", e);
            }
        }
        debug!(scope = %self.scope, "Subscription closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown.send(true);
            task.abort();
        }
    }
}

struct Worker {
    backend: Arc<dyn ChatBackend>,
    scope: Scope,
    reconnect: ReconnectConfig,
    events: mpsc::Sender<SyncEvent>,
    state: watch::Sender<SubscriptionState>,
    shutdown: watch::Receiver<bool>,
}

/// Why a live session ended.
enum Exit {
    /// Close requested or the owner went away.
    Stop,
    /// Transient failure; reconnect.
    Dropped,
    /// Permanent failure; already reported.
    Fatal,
}

impl Worker {
    async fn run(mut self) {
        let mut attempts = 0u32;

        loop {
            self.set_state(SubscriptionState::Connecting);
            match self.session(&mut attempts).await {
                Exit::Stop => break,
                Exit::Fatal => {
                    self.set_state(SubscriptionState::Disconnected);
                    self.wait_for_shutdown().await;
                    break;
                }
                Exit::Dropped => self.set_state(SubscriptionState::Disconnected),
            }

            if !self.reconnect.should_retry(attempts) {
                error!(scope = %self.scope, attempts, "Retry budget exhausted, feed degraded");
                if self.emit(SyncEvent::Degraded { attempts }).await {
                    self.wait_for_shutdown().await;
                }
                break;
            }

            let delay = self.reconnect.delay_for_attempt(attempts);
            attempts += 1;
            info!(
                scope = %self.scope,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(SubscriptionState::Closed);
    }

    /// One connection: open the feed, replay the backlog, forward events.
    async fn session(&mut self, attempts: &mut u32) -> Exit {
        let opened = tokio::select! {
            _ = self.shutdown.changed() => return Exit::Stop,
            opened = self.backend.subscribe(self.scope) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => return self.failure(err).await,
        };

        // The feed is live: anything committed from here on is delivered, so a
        // backlog fetched now leaves no gap.
        let backlog = tokio::select! {
            _ = self.shutdown.changed() => return Exit::Stop,
            backlog = fetch_backlog(self.backend.as_ref(), self.scope) => backlog,
        };
        let backlog = match backlog {
            Ok(backlog) => backlog,
            Err(err) => return self.failure(err).await,
        };

        *attempts = 0;
        self.set_state(SubscriptionState::Subscribed);
        info!(scope = %self.scope, "Subscribed");
        if !self.emit(SyncEvent::Resynced(backlog)).await {
            return Exit::Stop;
        }

        loop {
            let item = tokio::select! {
                _ = self.shutdown.changed() => return Exit::Stop,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(change)) => {
                    debug!(scope = %self.scope, kind = change.kind(), "Change received");
                    if !self.emit(SyncEvent::Change(change)).await {
                        return Exit::Stop;
                    }
                }
                Some(Err(err)) => {
                    warn!(scope = %self.scope, "Subscription dropped: {}", err);
                    return Exit::Dropped;
                }
                None => {
                    warn!(scope = %self.scope, "Subscription ended");
                    return Exit::Dropped;
                }
            }
        }
    }

    async fn failure(&mut self, err: ChatError) -> Exit {
        if err.is_transient() {
            warn!(scope = %self.scope, "Subscribe failed: {}", err);
            return Exit::Dropped;
        }
        error!(scope = %self.scope, "Subscription refused: {}", err);
        if self.emit(SyncEvent::Failed(err)).await {
            Exit::Fatal
        } else {
            Exit::Stop
        }
    }

    /// Deliver an event unless the subscription is shutting down.
    async fn emit(&mut self, event: SyncEvent) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = self.shutdown.changed() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    async fn wait_for_shutdown(&mut self) {
        while !*self.shutdown.borrow() {
            if self.shutdown.changed().await.is_err() {
                return;
            }
        }
    }

    fn set_state(&self, state: SubscriptionState) {
        self.state.send_replace(state);
    }
}

async fn fetch_backlog(backend: &dyn ChatBackend, scope: Scope) -> Result<Backlog, ChatError> {
    match scope {
        Scope::Conversation(id) => backend.list_messages(id).await.map(Backlog::Messages),
        Scope::User(_) => backend.list_conversations().await.map(Backlog::Inbox),
    }
}
