//! Cooperative typing indicator loops.
//!
//! Chat platforms show a typing indicator for a few seconds per signal, so
//! bridges re-send it on an interval while the agent works. The loop here
//! emits `session_id` ticks on a channel; the concrete bridge turns each
//! tick into its platform's chat action.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default re-send interval for typing signals.
pub const TYPING_INTERVAL: Duration = Duration::from_secs(4);

pub struct TypingLoops {
    interval: Duration,
    tx: mpsc::UnboundedSender<String>,
    tasks: DashMap<String, JoinHandle<()>>,
}

impl TypingLoops {
    /// Create the loop manager and the tick channel bridges consume.
    pub fn new(interval: Duration) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                interval,
                tx,
                tasks: DashMap::new(),
            },
            rx,
        )
    }

    /// Start (or keep) the typing loop for a session.
    ///
    /// The first tick fires immediately; later ticks follow the interval
    /// until [`stop`](Self::stop) cancels the task.
    pub fn start(&self, session_id: &str) {
        if self.tasks.contains_key(session_id) {
            return;
        }
        let tx = self.tx.clone();
        let session = session_id.to_string();
        let interval = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if tx.send(session.clone()).is_err() {
                    break;
                }
            }
        });
        self.tasks.insert(session_id.to_string(), task);
    }

    /// Cancel the typing loop for a session.
    pub fn stop(&self, session_id: &str) {
        if let Some((_, task)) = self.tasks.remove(session_id) {
            task.abort();
        }
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tasks.contains_key(session_id)
    }

    /// Cancel every loop (shutdown).
    pub fn stop_all(&self) {
        let sessions: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for session in sessions {
            self.stop(&session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loop_ticks_until_stopped() {
        let (loops, mut rx) = TypingLoops::new(Duration::from_millis(10));
        loops.start("sess_1");
        assert!(loops.is_running("sess_1"));

        // First tick is immediate; at least one more follows the interval.
        assert_eq!(rx.recv().await.unwrap(), "sess_1");
        assert_eq!(rx.recv().await.unwrap(), "sess_1");

        loops.stop("sess_1");
        assert!(!loops.is_running("sess_1"));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (loops, mut rx) = TypingLoops::new(Duration::from_millis(500));
        loops.start("sess_1");
        loops.start("sess_1");
        // Exactly one immediate tick despite two starts.
        assert_eq!(rx.recv().await.unwrap(), "sess_1");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err()
        );
        loops.stop_all();
    }

    #[tokio::test]
    async fn stop_unknown_session_is_harmless() {
        let (loops, _rx) = TypingLoops::new(TYPING_INTERVAL);
        loops.stop("sess_none");
    }
}
