//! Client side of the conversation subsystem.
//!
//! This crate provides:
//!
//! - [`HttpBackend`] - a [`chat_core::ChatBackend`] over the server's
//!   JSON-RPC and Server-Sent Events endpoints
//! - [`Subscription`] - the realtime sync engine (reconnect with bounded
//!   backoff, backlog replay after every resubscribe)
//! - [`ConversationRoom`] / [`ConversationView`] - optimistic sends
//!   reconciled against server-confirmed messages
//! - [`UnreadAggregator`] - one live unread badge for many UI surfaces
//! - [`directive`] - parsing of bracketed content directives
//!
//! # Example
//!
//! ```no_run
//! use chat_client::{ChatSession, ClientConfig};
//! use chat_core::UserId;
//!
//! # async fn example(me: UserId, friend: UserId) -> Result<(), chat_core::ChatError> {
//! let session = ChatSession::connect(ClientConfig::new("http://127.0.0.1:8790", me)).await?;
//!
//! let conversation = session.start_conversation(friend).await?;
//! let room = session.open(conversation).await?;
//! room.send("hello").await?;
//!
//! let mut badge = session.unread().watch();
//! badge.changed().await.ok();
//! println!("unread: {}", badge.borrow().count);
//!
//! room.close().await;
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod directive;
pub mod error;
pub mod room;
pub mod session;
pub mod sse;
pub mod sync;
pub mod unread;
pub mod view;

pub use client::HttpBackend;
pub use config::{ClientConfig, SyncOptions};
pub use directive::{Directive, ParsedContent};
pub use error::ClientError;
pub use room::{ConversationRoom, RoomSnapshot};
pub use session::ChatSession;
pub use sync::{Backlog, ReconnectConfig, Subscription, SubscriptionState, SyncEvent};
pub use unread::{UnreadAggregator, UnreadBadge, UnreadMap};
pub use view::{ConversationView, Entry, LocalId, PendingMessage};
