//! Application state shared across handlers.

use std::time::Duration;

use crate::service::ChatService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: ChatService,
    /// Interval between SSE keep-alive comments.
    pub keep_alive: Duration,
}

impl AppState {
    /// Create new application state.
    pub fn new(service: ChatService) -> Self {
        Self {
            service,
            keep_alive: Duration::from_secs(15),
        }
    }
}
