//! Chat platform bridges.
//!
//! A bridge adapts one chat platform (Telegram forum topics, Slack
//! threads, Discord threads) to the platform-agnostic callbacks in
//! [`BridgeInterface`]. The core never imports platform SDKs; concrete
//! bridges live out of tree and are registered by name on the
//! [`manager::BridgeManager`]. Everything platform-independent that
//! bridges share (the event subscriber loop, allow timers, notification
//! batching, status debouncing, typing loops, thread naming, pairing,
//! and the command router) lives in this module's submodules.

pub mod allow;
pub mod batch;
pub mod commands;
pub mod debounce;
pub mod manager;
pub mod names;
pub mod pairing;
pub mod state;
pub mod subscriber;
pub mod typing;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use minder_protocol::ApprovalRequest;

pub use manager::BridgeManager;
pub use subscriber::BridgeSubscriber;

/// Contract every messaging platform bridge implements.
///
/// Calls are fire-and-forget from the producer's view: a returned error is
/// logged by the caller and never mutates session state.
#[async_trait]
pub trait BridgeInterface: Send + Sync {
    /// Deliver agent output text (markdown) to the session's thread.
    async fn on_output(&self, session_id: &str, text: &str, metadata: Option<&Value>)
    -> Result<()>;

    /// Render an approval request with its options.
    async fn on_approval_request(&self, session_id: &str, request: &ApprovalRequest)
    -> Result<()>;

    /// Surface an agent status change ("executing", "done", "error", ...).
    async fn on_status_change(
        &self,
        session_id: &str,
        status: &str,
        metadata: Option<&Value>,
    ) -> Result<()>;

    /// Show the platform's typing indicator for the session's thread.
    async fn on_typing(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    /// Cancel the typing indicator.
    async fn on_typing_stopped(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    /// The session is gone; the bridge may close or annotate its thread.
    async fn on_session_removed(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    /// Create a platform thread for a new session.
    ///
    /// Returns platform-specific thread info; at minimum a `thread_id`
    /// field plus a `platform` tag.
    async fn create_thread(&self, session_id: &str, session_name: &str) -> Result<Value>;
}
