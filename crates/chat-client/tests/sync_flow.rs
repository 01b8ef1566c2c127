//! Client sync behaviour against an in-process service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_client::{
    ChatSession, ConversationRoom, Entry, ReconnectConfig, SubscriptionState, SyncOptions,
};
use chat_core::{
    async_trait, ChatBackend, ChatError, ConversationId, ConversationSummary, EventStream, MarkRead,
    Message, MessageType, Scope, UserId,
};
use chat_server::{ChangeFeed, ChatService, LocalBackend};
use database::Database;
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);

async fn setup() -> ChatService {
    let db = Database::connect_in_memory().await.unwrap();
    db.migrate().await.unwrap();
    ChatService::new(db, ChangeFeed::default())
}

fn fast_options() -> SyncOptions {
    SyncOptions {
        send_timeout: Duration::from_secs(2),
        reconnect: ReconnectConfig {
            max_retries: Some(20),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        },
        fallback_poll_interval: Duration::from_millis(50),
    }
}

fn session(service: &ChatService, user: UserId) -> ChatSession {
    ChatSession::new(Arc::new(service.backend_for(user)), fast_options())
}

async fn wait_until<T>(rx: &mut watch::Receiver<T>, condition: impl FnMut(&T) -> bool) -> T
where
    T: Clone,
{
    tokio::time::timeout(WAIT, rx.wait_for(condition))
        .await
        .expect("condition not reached in time")
        .expect("sender dropped")
        .clone()
}

fn contents(room: &ConversationRoom) -> Vec<String> {
    room.snapshot()
        .entries
        .iter()
        .map(|e| e.content().to_string())
        .collect()
}

enum AppendFault {
    Fail,
    Delay(Duration),
}

/// Wraps a [`LocalBackend`] and misbehaves on selected calls.
struct FaultyBackend {
    inner: LocalBackend,
    append: Option<AppendFault>,
    refuse_subscribe: Arc<AtomicBool>,
}

impl FaultyBackend {
    fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            append: None,
            refuse_subscribe: Arc::new(AtomicBool::new(false)),
        }
    }

    fn with_append(mut self, fault: AppendFault) -> Self {
        self.append = Some(fault);
        self
    }
}

#[async_trait]
impl ChatBackend for FaultyBackend {
    fn user_id(&self) -> UserId {
        self.inner.user_id()
    }

    async fn create_or_get_conversation(&self, other: UserId) -> Result<ConversationId, ChatError> {
        self.inner.create_or_get_conversation(other).await
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message, ChatError> {
        match &self.append {
            Some(AppendFault::Fail) => Err(ChatError::Storage("disk full".to_string())),
            Some(AppendFault::Delay(delay)) => {
                tokio::time::sleep(*delay).await;
                self.inner.append_message(conversation_id, content, message_type).await
            }
            None => self.inner.append_message(conversation_id, content, message_type).await,
        }
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ChatError> {
        self.inner.list_messages(conversation_id).await
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<MarkRead, ChatError> {
        self.inner.mark_conversation_read(conversation_id).await
    }

    async fn is_unread(&self, conversation_id: ConversationId) -> Result<bool, ChatError> {
        self.inner.is_unread(conversation_id).await
    }

    async fn get_unread_count(&self) -> Result<u64, ChatError> {
        self.inner.get_unread_count().await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        self.inner.list_conversations().await
    }

    async fn subscribe(&self, scope: Scope) -> Result<EventStream, ChatError> {
        if self.refuse_subscribe.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("connection refused".to_string()));
        }
        self.inner.subscribe(scope).await
    }
}

#[tokio::test]
async fn test_two_user_scenario() {
    let service = setup().await;
    let (u1, u2) = (UserId::new(), UserId::new());
    let alice = session(&service, u1);
    let bob = session(&service, u2);

    let conversation = alice.start_conversation(u2).await.unwrap();
    assert_eq!(bob.start_conversation(u1).await.unwrap(), conversation);

    let alice_room = alice.open(conversation).await.unwrap();
    let sent = alice_room.send("hello").await.unwrap();
    assert_eq!(sent.sender_id, u1);

    // Bob's badge picks the message up from the user feed.
    let mut bob_badge = bob.unread().watch();
    wait_until(&mut bob_badge, |b| b.loaded && b.count == 1).await;
    assert!(bob.unread().is_unread(conversation).await.unwrap());

    // Opening the room marks it read.
    let bob_room = bob.open(conversation).await.unwrap();
    assert_eq!(contents(&bob_room), vec!["hello"]);
    wait_until(&mut bob_badge, |b| b.count == 0).await;
    assert!(!service.is_unread(u2, conversation).await.unwrap());

    bob_room.send("hi back").await.unwrap();

    let mut alice_view = alice_room.watch();
    let snapshot = wait_until(&mut alice_view, |s| s.messages().len() == 2).await;
    let messages = snapshot.messages();
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[1].content, "hi back");
    assert!(messages[1].created_at > messages[0].created_at);

    // Alice has the room open, so the reply is marked read right away.
    let mut alice_badge = alice.unread().watch();
    wait_until(&mut alice_badge, |b| b.loaded && b.count == 0).await;
    tokio::time::timeout(WAIT, async {
        while service.get_unread_count(u1).await.unwrap() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    alice_room.close().await;
    bob_room.close().await;
    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_optimistic_send_confirms_once() {
    let service = setup().await;
    let (u1, u2) = (UserId::new(), UserId::new());
    let alice = session(&service, u1);
    let conversation = alice.start_conversation(u2).await.unwrap();
    let room = alice.open(conversation).await.unwrap();

    let message = room.send("one").await.unwrap();
    let snapshot = room.snapshot();
    assert_eq!(snapshot.pending_count(), 0);
    assert_eq!(snapshot.entries, vec![Entry::Confirmed(message.clone())]);

    // The feed echo of our own insert must not duplicate it.
    room.send("two").await.unwrap();
    let mut view = room.watch();
    let snapshot = wait_until(&mut view, |s| s.messages().len() == 2).await;
    assert_eq!(snapshot.messages()[0].id, message.id);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(room.snapshot().messages().len(), 2);

    room.close().await;
}

#[tokio::test]
async fn test_failed_send_rolls_back() {
    let service = setup().await;
    let (u1, u2) = (UserId::new(), UserId::new());
    let conversation = service.create_or_get_conversation(u1, u2).await.unwrap();

    let backend = FaultyBackend::new(service.backend_for(u1)).with_append(AppendFault::Fail);
    let room = ConversationRoom::open(Arc::new(backend), conversation, fast_options())
        .await
        .unwrap();

    let err = room.send("lost").await.unwrap_err();
    assert!(matches!(err, ChatError::SendFailed(_)), "got {:?}", err);

    let snapshot = room.snapshot();
    assert!(snapshot.entries.is_empty());
    assert!(service.list_messages(u1, conversation).await.unwrap().is_empty());

    room.close().await;
}

#[tokio::test]
async fn test_send_timeout_rolls_back_then_echo_confirms() {
    let service = setup().await;
    let (u1, u2) = (UserId::new(), UserId::new());
    let conversation = service.create_or_get_conversation(u1, u2).await.unwrap();

    let backend = FaultyBackend::new(service.backend_for(u1))
        .with_append(AppendFault::Delay(Duration::from_millis(300)));
    let options = SyncOptions {
        send_timeout: Duration::from_millis(50),
        ..fast_options()
    };
    let room = ConversationRoom::open(Arc::new(backend), conversation, options)
        .await
        .unwrap();

    let err = room.send("slow").await.unwrap_err();
    assert!(err.to_string().contains("no response"), "got {}", err);
    assert_eq!(room.snapshot().pending_count(), 0);

    // The store still commits the write; the echo shows it as confirmed.
    let mut view = room.watch();
    let snapshot = wait_until(&mut view, |s| s.messages().len() == 1).await;
    assert_eq!(snapshot.messages()[0].content, "slow");
    assert_eq!(snapshot.pending_count(), 0);

    room.close().await;
}

#[tokio::test]
async fn test_empty_message_rejected() {
    let service = setup().await;
    let (u1, u2) = (UserId::new(), UserId::new());
    let alice = session(&service, u1);
    let conversation = alice.start_conversation(u2).await.unwrap();
    let room = alice.open(conversation).await.unwrap();

    assert_eq!(room.send("   ").await.unwrap_err(), ChatError::EmptyMessage);
    assert_eq!(
        alice
            .backend()
            .append_message(conversation, "\n\t", MessageType::Text)
            .await
            .unwrap_err(),
        ChatError::EmptyMessage
    );
    assert!(room.snapshot().entries.is_empty());

    room.close().await;
}

#[tokio::test]
async fn test_open_requires_membership() {
    let service = setup().await;
    let (u1, u2, u3) = (UserId::new(), UserId::new(), UserId::new());
    let conversation = service.create_or_get_conversation(u1, u2).await.unwrap();

    let outsider = session(&service, u3);
    let err = outsider.open(conversation).await.err().expect("open should fail");
    assert!(err.is_integrity(), "got {:?}", err);
}

#[tokio::test]
async fn test_reconnect_replays_missed_messages() {
    let service = setup().await;
    let (u1, u2) = (UserId::new(), UserId::new());
    let alice = session(&service, u1);
    let conversation = alice.start_conversation(u2).await.unwrap();
    let room = alice.open(conversation).await.unwrap();
    let mut view = room.watch();

    for round in 0..3 {
        assert!(service.feed().disconnect_all() > 0);
        // Written while the room is (probably) between connections.
        service
            .append_message(u2, conversation, &format!("missed {}", round), MessageType::Text)
            .await
            .unwrap();
        wait_until(&mut view, |s| {
            s.messages().len() == round + 1 && s.state == SubscriptionState::Subscribed
        })
        .await;
    }

    let snapshot = room.snapshot();
    assert!(!snapshot.stale);
    let ids: Vec<_> = snapshot.messages().iter().map(|m| m.id).collect();
    let mut unique = ids.clone();
    unique.dedup();
    assert_eq!(ids, unique);

    room.close().await;
}

#[tokio::test]
async fn test_degraded_room_recovers_on_resync() {
    let service = setup().await;
    let (u1, u2) = (UserId::new(), UserId::new());
    let conversation = service.create_or_get_conversation(u1, u2).await.unwrap();

    let backend = FaultyBackend::new(service.backend_for(u1));
    let refuse = backend.refuse_subscribe.clone();
    let options = SyncOptions {
        reconnect: ReconnectConfig {
            max_retries: Some(2),
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        },
        ..fast_options()
    };
    let room = ConversationRoom::open(Arc::new(backend), conversation, options)
        .await
        .unwrap();
    let mut view = room.watch();

    refuse.store(true, Ordering::SeqCst);
    service.feed().disconnect_all();
    wait_until(&mut view, |s| s.stale).await;

    service
        .append_message(u2, conversation, "while degraded", MessageType::Text)
        .await
        .unwrap();

    refuse.store(false, Ordering::SeqCst);
    room.resync().await.unwrap();
    let snapshot = room.snapshot();
    assert!(!snapshot.stale);
    assert_eq!(snapshot.messages().len(), 1);
    assert_eq!(snapshot.messages()[0].content, "while degraded");

    room.close().await;
}

#[tokio::test]
async fn test_switch_conversation_ignores_previous() {
    let service = setup().await;
    let (u1, u2, u3) = (UserId::new(), UserId::new(), UserId::new());
    let alice = session(&service, u1);
    let first = alice.start_conversation(u2).await.unwrap();
    let second = alice.start_conversation(u3).await.unwrap();

    let room = alice.open(first).await.unwrap();
    service
        .append_message(u2, first, "in first", MessageType::Text)
        .await
        .unwrap();
    let mut view = room.watch();
    wait_until(&mut view, |s| s.messages().len() == 1).await;

    room.switch_to(second).await.unwrap();
    assert_eq!(room.snapshot().conversation_id, Some(second));
    assert!(room.snapshot().entries.is_empty());

    service
        .append_message(u2, first, "late in first", MessageType::Text)
        .await
        .unwrap();
    service
        .append_message(u3, second, "in second", MessageType::Text)
        .await
        .unwrap();

    wait_until(&mut view, |s| !s.messages().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = room.snapshot();
    assert_eq!(snapshot.conversation_id, Some(second));
    assert!(snapshot.messages().iter().all(|m| m.conversation_id == second));
    assert_eq!(contents(&room), vec!["in second"]);

    room.close().await;
}

#[tokio::test]
async fn test_badge_shared_by_watchers() {
    let service = setup().await;
    let (u1, u2, u3) = (UserId::new(), UserId::new(), UserId::new());
    let bob = session(&service, u2);
    let mut header = bob.unread().watch();
    let mut sidebar = bob.unread().watch();
    wait_until(&mut header, |b| b.loaded).await;

    let first = service.create_or_get_conversation(u1, u2).await.unwrap();
    let second = service.create_or_get_conversation(u3, u2).await.unwrap();
    service
        .append_message(u1, first, "ping", MessageType::Text)
        .await
        .unwrap();
    service
        .append_message(u3, second, "pong", MessageType::Text)
        .await
        .unwrap();

    wait_until(&mut header, |b| b.count == 2).await;
    wait_until(&mut sidebar, |b| b.count == 2).await;
    assert_eq!(bob.unread_count().await.unwrap(), 2);

    let outcome = bob.unread().mark_read(first).await.unwrap();
    assert!(outcome.advanced());
    assert_eq!(bob.unread().badge().count, 1);
    wait_until(&mut sidebar, |b| b.count == 1).await;

    // Replying counts as reading.
    bob.backend()
        .append_message(second, "thanks", MessageType::Text)
        .await
        .unwrap();
    wait_until(&mut header, |b| b.count == 0).await;
    assert!(!bob.unread().badge().has_unread());

    bob.close().await;
}

#[tokio::test]
async fn test_badge_polls_while_degraded() {
    let service = setup().await;
    let (u1, u2) = (UserId::new(), UserId::new());
    let conversation = service.create_or_get_conversation(u1, u2).await.unwrap();

    let backend = FaultyBackend::new(service.backend_for(u2));
    let refuse = backend.refuse_subscribe.clone();
    let options = SyncOptions {
        reconnect: ReconnectConfig {
            max_retries: Some(1),
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1.0,
        },
        ..fast_options()
    };
    let bob = ChatSession::new(Arc::new(backend), options);
    let mut badge = bob.unread().watch();
    wait_until(&mut badge, |b| b.loaded && !b.stale).await;

    refuse.store(true, Ordering::SeqCst);
    service.feed().disconnect_all();
    wait_until(&mut badge, |b| b.stale).await;

    // No live feed: the periodic refresh still finds the message.
    service
        .append_message(u1, conversation, "are you there?", MessageType::Text)
        .await
        .unwrap();
    wait_until(&mut badge, |b| b.count == 1).await;

    refuse.store(false, Ordering::SeqCst);
    let recovered = wait_until(&mut badge, |b| !b.stale).await;
    assert_eq!(recovered.count, 1);

    bob.close().await;
}
