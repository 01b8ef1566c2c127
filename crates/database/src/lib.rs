//! SQLite persistence layer for two-party conversations.
//!
//! This crate provides async database operations for the three server-side
//! components of the messaging subsystem using SQLx with SQLite:
//!
//! - [`conversation`] - the Conversation Registry (atomic get-or-create per
//!   unordered user pair, membership, the conversation list)
//! - [`message`] - the append-only Message Store
//! - [`read_state`] - per-participant read markers and unread computation
//!
//! # Example
//!
//! ```no_run
//! use chat_core::{MessageType, UserId};
//! use database::{conversation, message, read_state, Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and run migrations
//!     let db = Database::connect("sqlite:chat.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     let (alice, bob) = (UserId::new(), UserId::new());
//!     let registration = conversation::get_or_create(&db, alice, bob).await?;
//!     let id = registration.conversation.id;
//!
//!     message::append_message(&db, id, alice, "hi", MessageType::Text).await?;
//!     assert!(read_state::is_unread(db.pool(), id, bob).await?);
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod conversation;
pub mod error;
pub mod message;
pub mod models;
pub mod read_state;

pub use clock::StoreClock;
pub use conversation::Registration;
pub use error::{DatabaseError, Result};

use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Database connection wrapper.
///
/// Owns the pool and the store clock; every server-assigned timestamp comes
/// from the clock so that times handed out by one process strictly increase.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    clock: Arc<StoreClock>,
}

impl Database {
    /// Default pool size for database connections.
    const DEFAULT_POOL_SIZE: u32 = 20;

    /// Connect to a SQLite database.
    ///
    /// The URL should be in the format `sqlite:path/to/db.sqlite?mode=rwc`.
    /// Use `?mode=rwc` to create the database file if it doesn't exist.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example() -> database::Result<()> {
    /// let db = database::Database::connect("sqlite:data/chat.db?mode=rwc").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Connect to a private in-memory database.
    ///
    /// Each SQLite connection to `:memory:` is a separate database, so the
    /// pool is pinned to a single connection.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect_with_pool_size("sqlite::memory:", 1).await
    }

    /// Connect to a SQLite database with a custom pool size.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!(
            "Connected to database: {} (pool size: {})",
            url,
            pool_size
        );

        Ok(Self {
            pool,
            clock: Arc::new(StoreClock::new()),
        })
    }

    /// Run database migrations, then advance the clock past every stored time.
    ///
    /// This should be called once after connecting to ensure the schema is up to date.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        let latest = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT MAX(ts) FROM (
                SELECT MAX(created_at) AS ts FROM messages
                UNION ALL
                SELECT MAX(last_read_at) AS ts FROM conversation_participants
                UNION ALL
                SELECT MAX(created_at) AS ts FROM conversations
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        if let Some(latest) = latest {
            self.clock.observe(latest);
        }

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the store clock.
    pub fn clock(&self) -> &StoreClock {
        &self.clock
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
