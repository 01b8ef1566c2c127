//! Server side of the conversation subsystem.
//!
//! - [`ChatService`] - registry, message store and read state, publishing
//!   every committed write on the [`ChangeFeed`]
//! - [`LocalBackend`] - an in-process [`chat_core::ChatBackend`]
//! - [`app`] - the HTTP surface: JSON-RPC at `/api/v1/rpc`, Server-Sent
//!   Events at `/api/v1/events`, and `/health`
//!
//! # Example
//!
//! ```no_run
//! use chat_server::{app, ChangeFeed, ChatService};
//! use database::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::connect("sqlite:chat.db?mode=rwc").await?;
//! db.migrate().await?;
//!
//! let service = ChatService::new(db, ChangeFeed::default());
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8790").await?;
//! axum::serve(listener, app(service)).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod feed;
pub mod routes;
pub mod service;
pub mod state;

pub use backend::LocalBackend;
pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;
pub use feed::{ChangeFeed, FeedSubscription};
pub use service::ChatService;
pub use state::AppState;

/// Build the HTTP application for `service`.
pub fn app(service: ChatService) -> axum::Router {
    routes::router().with_state(AppState::new(service))
}
