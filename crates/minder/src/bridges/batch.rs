//! Per-session batching of short notification messages.
//!
//! Auto-approvals can fire in quick bursts; posting each one to a chat
//! thread is noise. The batcher buffers lines per session and flushes them
//! as one joined message after a quiet window.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Default quiet window before a buffered batch is flushed.
pub const FLUSH_WINDOW: Duration = Duration::from_secs(2);

/// Buffers notification lines and emits `(session_id, joined_message)`
/// pairs on its channel once the window lapses.
pub struct NotificationBatcher {
    window: Duration,
    buffers: Arc<DashMap<String, Vec<String>>>,
    tx: mpsc::UnboundedSender<(String, String)>,
}

impl NotificationBatcher {
    /// Create a batcher and the receiving end bridges consume.
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                window,
                buffers: Arc::new(DashMap::new()),
                tx,
            },
            rx,
        )
    }

    /// Queue one notification line for a session.
    ///
    /// The first line for an idle session arms the flush timer; later lines
    /// within the window ride along in the same batch.
    pub fn push(&self, session_id: &str, line: &str) {
        let mut buffer = self.buffers.entry(session_id.to_string()).or_default();
        buffer.push(line.to_string());
        let armed = buffer.len() > 1;
        drop(buffer);
        if armed {
            return;
        }

        let buffers = Arc::clone(&self.buffers);
        let tx = self.tx.clone();
        let session_id = session_id.to_string();
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some((_, lines)) = buffers.remove(&session_id)
                && !lines.is_empty()
            {
                let _ = tx.send((session_id, lines.join("\n")));
            }
        });
    }

    /// Lines currently buffered for a session (tests and shutdown drains).
    pub fn pending(&self, session_id: &str) -> usize {
        self.buffers.get(session_id).map(|b| b.len()).unwrap_or(0)
    }
}
