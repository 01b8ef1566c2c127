//! Configuration types for chat-client.

use std::time::Duration;

use chat_core::{Scope, UserId};

use crate::sync::ReconnectConfig;

/// Default time a send may wait for the server before it is rolled back.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval of the unread full refresh while the feed is degraded.
pub const DEFAULT_FALLBACK_POLL: Duration = Duration::from_secs(30);

/// Timing knobs shared by rooms and the unread aggregator.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// A send without a response within this window is failed and rolled back.
    pub send_timeout: Duration,
    /// Backoff policy for dropped subscriptions.
    pub reconnect: ReconnectConfig,
    /// Full-refresh interval used only while the user feed is degraded.
    pub fallback_poll_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            fallback_poll_interval: DEFAULT_FALLBACK_POLL,
        }
    }
}

/// Configuration for connecting to a chat server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server (e.g., "http://127.0.0.1:8790").
    pub base_url: String,
    /// Session identity sent with every request.
    pub user_id: UserId,
    pub send_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub fallback_poll_interval: Duration,
}

impl ClientConfig {
    /// Create a new configuration with the given base URL.
    pub fn new(base_url: impl Into<String>, user_id: UserId) -> Self {
        let defaults = SyncOptions::default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id,
            send_timeout: defaults.send_timeout,
            reconnect: defaults.reconnect,
            fallback_poll_interval: defaults.fallback_poll_interval,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_fallback_poll_interval(mut self, interval: Duration) -> Self {
        self.fallback_poll_interval = interval;
        self
    }

    /// The timing knobs for rooms and the unread aggregator.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            send_timeout: self.send_timeout,
            reconnect: self.reconnect.clone(),
            fallback_poll_interval: self.fallback_poll_interval,
        }
    }

    /// Get the RPC endpoint URL.
    pub fn rpc_url(&self) -> String {
        format!("{}/api/v1/rpc", self.base_url)
    }

    /// Get the events endpoint URL for a subscription scope.
    pub fn events_url(&self, scope: Scope) -> String {
        let scope = scope.to_string();
        format!(
            "{}/api/v1/events?scope={}",
            self.base_url,
            urlencoding::encode(&scope)
        )
    }

    /// Get the health check endpoint URL.
    pub fn check_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}
