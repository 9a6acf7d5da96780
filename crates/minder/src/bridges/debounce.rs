//! Status debouncing.
//!
//! A crashing runner can emit the same error status several times in a
//! row (state event plus error event, retries, ...). Within the window,
//! only the first instance of a status reaches the chat thread.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Default suppression window for repeated statuses.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(30);

pub struct StatusDebouncer {
    window: Duration,
    last_sent: DashMap<(String, String), Instant>,
}

impl StatusDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_sent: DashMap::new(),
        }
    }

    /// Whether this status should be forwarded now.
    ///
    /// Returns true (and records the send) when the same status was not
    /// forwarded for this session within the window.
    pub fn should_send(&self, session_id: &str, status: &str) -> bool {
        let key = (session_id.to_string(), status.to_string());
        let now = Instant::now();
        if let Some(last) = self.last_sent.get(&key)
            && now.duration_since(*last) < self.window
        {
            return false;
        }
        self.last_sent.insert(key, now);
        true
    }

    pub fn clear(&self, session_id: &str) {
        self.last_sent.retain(|(sid, _), _| sid != session_id);
    }
}

impl Default for StatusDebouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW)
    }
}
