//! Chat server binary.
//!
//! Serves the conversation RPC surface and the realtime change feed over HTTP.

use chat_server::{app, ChangeFeed, ChatService, ServerConfig};
use database::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ServerConfig::from_env()?;
    info!(addr = %config.addr, "Starting chat server");

    if let Some(dir) = config.database_dir() {
        std::fs::create_dir_all(&dir)?;
    }

    // Connect to database
    let db = Database::connect_with_pool_size(&config.database_url, config.pool_size).await?;
    db.migrate().await?;

    let feed = ChangeFeed::new(config.feed_capacity);
    let service = ChatService::new(db.clone(), feed.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "Chat server listening");
    axum::serve(listener, app(service))
        .with_graceful_shutdown(shutdown_signal(feed))
        .await?;

    db.close().await;
    info!("Chat server stopped");
    Ok(())
}

/// Wait for Ctrl-C, then end every open event stream so shutdown can finish.
async fn shutdown_signal(feed: ChangeFeed) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    feed.disconnect_all();
}
