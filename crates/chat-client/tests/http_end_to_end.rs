//! Full round trips over HTTP: JSON-RPC calls and the SSE change feed.

use std::net::SocketAddr;
use std::time::Duration;

use chat_client::{ChatSession, ClientConfig, HttpBackend, ReconnectConfig, SubscriptionState};
use chat_core::{ChatBackend, ChatError, MessageType, UserId};
use chat_server::{app, ChangeFeed, ChatService};
use database::Database;

const WAIT: Duration = Duration::from_secs(10);

async fn start_server() -> (SocketAddr, ChatService) {
    let db = Database::connect_in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let service = ChatService::new(db, ChangeFeed::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(service.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, service)
}

fn config(addr: SocketAddr, user: UserId) -> ClientConfig {
    ClientConfig::new(format!("http://{}/", addr), user)
        .with_send_timeout(Duration::from_secs(5))
        .with_fallback_poll_interval(Duration::from_millis(100))
        .with_reconnect(ReconnectConfig {
            max_retries: Some(20),
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        })
}

#[tokio::test]
async fn test_connect_fails_without_server() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = HttpBackend::connect(config(addr, UserId::new()))
        .await
        .err()
        .expect("nothing is listening");
    assert!(err.is_transient(), "got {:?}", err);
}

#[tokio::test]
async fn test_errors_cross_the_wire() {
    let (addr, service) = start_server().await;
    let (u1, u2, u3) = (UserId::new(), UserId::new(), UserId::new());
    let conversation = service.create_or_get_conversation(u1, u2).await.unwrap();

    let me = HttpBackend::connect(config(addr, u1)).await.unwrap();
    assert_eq!(
        me.create_or_get_conversation(u1).await.unwrap_err(),
        ChatError::InvalidParticipants { user_id: u1 }
    );
    assert_eq!(
        me.append_message(conversation, "  ", MessageType::Text)
            .await
            .unwrap_err(),
        ChatError::EmptyMessage
    );

    let outsider = HttpBackend::connect(config(addr, u3)).await.unwrap();
    let err = outsider.list_messages(conversation).await.unwrap_err();
    assert!(err.is_integrity(), "got {:?}", err);
    let err = outsider
        .subscribe(chat_core::Scope::Conversation(conversation))
        .await
        .err()
        .expect("subscription should be refused");
    assert!(err.is_integrity(), "got {:?}", err);
}

#[tokio::test]
async fn test_conversation_over_http() {
    let (addr, service) = start_server().await;
    let (u1, u2) = (UserId::new(), UserId::new());

    let alice = ChatSession::connect(config(addr, u1)).await.unwrap();
    let bob = ChatSession::connect(config(addr, u2)).await.unwrap();

    let conversation = alice.start_conversation(u2).await.unwrap();
    let alice_room = alice.open(conversation).await.unwrap();
    let bob_room = bob.open(conversation).await.unwrap();

    let sent = alice_room
        .send("[JOB_LINK:job-7] I applied for this job")
        .await
        .unwrap();
    assert_eq!(sent.content, "[JOB_LINK:job-7] I applied for this job");

    let mut bob_view = bob_room.watch();
    let snapshot = tokio::time::timeout(WAIT, bob_view.wait_for(|s| s.messages().len() == 1))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(snapshot.messages()[0].id, sent.id);
    let parsed = chat_client::directive::parse(&snapshot.messages()[0].content);
    assert_eq!(
        parsed.directive,
        chat_client::Directive::ViewJob {
            job_id: "job-7".to_string()
        }
    );

    // Bob is looking at the room, so nothing stays unread for him.
    tokio::time::timeout(WAIT, async {
        while service.get_unread_count(u2).await.unwrap() != 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    // Drop every stream; the rooms reconnect and replay what they missed.
    service.feed().disconnect_all();
    bob_room.send("still there?").await.unwrap();

    let mut alice_view = alice_room.watch();
    let snapshot = tokio::time::timeout(
        WAIT,
        alice_view.wait_for(|s| {
            s.messages().len() == 2 && s.state == SubscriptionState::Subscribed
        }),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(snapshot.messages()[1].content, "still there?");

    let conversations = alice.conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].other_user_id, u2);

    alice_room.close().await;
    bob_room.close().await;
    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_badge_over_http() {
    let (addr, service) = start_server().await;
    let (u1, u2) = (UserId::new(), UserId::new());

    let bob = ChatSession::connect(config(addr, u2)).await.unwrap();
    let mut badge = bob.unread().watch();
    tokio::time::timeout(WAIT, badge.wait_for(|b| b.loaded))
        .await
        .unwrap()
        .unwrap();

    let conversation = service.create_or_get_conversation(u1, u2).await.unwrap();
    service
        .append_message(u1, conversation, "new booking", MessageType::BookingRequest)
        .await
        .unwrap();
    tokio::time::timeout(WAIT, badge.wait_for(|b| b.count == 1))
        .await
        .unwrap()
        .unwrap();

    bob.unread().mark_read(conversation).await.unwrap();
    assert_eq!(bob.unread().badge().count, 0);
    assert_eq!(bob.unread_count().await.unwrap(), 0);

    bob.close().await;
}
