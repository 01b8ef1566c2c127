//! Strictly increasing server clock.

use std::sync::atomic::{AtomicI64, Ordering};

use chat_core::Timestamp;

use crate::models::timestamp_from_micros;

/// Hands out strictly increasing microsecond timestamps.
///
/// Wall-clock time is used when it is ahead of the last value handed out;
/// otherwise the previous value plus one microsecond.
#[derive(Debug, Default)]
pub struct StoreClock {
    last: AtomicI64,
}

impl StoreClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp in microseconds since the epoch.
    pub fn now_micros(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp_micros();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        wall.max(previous + 1)
    }

    /// Next timestamp.
    pub fn now(&self) -> Timestamp {
        let micros = self.now_micros();
        // The wall clock is always representable; fall back to it regardless.
        timestamp_from_micros("Clock", micros).unwrap_or_else(|_| chrono::Utc::now())
    }

    /// Make sure every later value is past `micros`.
    pub fn observe(&self, micros: i64) {
        self.last.fetch_max(micros, Ordering::SeqCst);
    }
}
