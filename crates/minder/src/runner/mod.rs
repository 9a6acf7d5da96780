//! Runner contract and adapters.
//!
//! A runner drives one agent backend. The session API talks to runners
//! only through the [`Runner`] trait; runners report back through the
//! [`RunnerEvents`] sink, which owns all store mutations so adapters stay
//! free of session bookkeeping.

pub mod echo;
pub mod events;
pub mod process;
pub mod registry;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use minder_protocol::PermissionResult;

pub use events::ApiRunnerEvents;
pub use registry::RunnerRegistry;

/// Contract every agent backend adapter implements.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Begin a turn. Must cause a header/metadata and eventual output or
    /// error through the events sink. Returns once the turn is launched,
    /// not once it completes.
    async fn start(&self, session_id: &str, prompt: &str, approval_choice: u8) -> Result<()>;

    /// Deliver human input to an existing turn or start a follow-up turn.
    async fn send_input(&self, session_id: &str, text: &str) -> Result<()>;

    /// Terminate the session's turn. Idempotent after terminal.
    async fn stop(&self, session_id: &str) -> Result<Option<i32>>;

    /// Change the approval policy mid-session.
    async fn update_permission_mode(&self, session_id: &str, mode: &str) -> Result<()>;

    /// Stable adapter identifier.
    fn runner_type(&self) -> &'static str;
}

/// Callback sink a runner drives while working a turn.
///
/// Implementations update session state and emit log events; runners never
/// touch the store directly.
#[async_trait]
pub trait RunnerEvents: Send + Sync {
    /// Store header text; capture `thread_id` as the runner session id only
    /// if unset and not the literal `"unknown"`.
    async fn on_header(
        &self,
        session_id: &str,
        title: Option<&str>,
        thread_id: Option<&str>,
        model: Option<&str>,
        provider: Option<&str>,
    );

    /// Runner produced output. `kind == "header"` stores the banner instead
    /// of emitting; `kind == "output_final"` emits the accumulated blob
    /// event; everything else emits an `output` event carrying `is_final`.
    async fn on_output(
        &self,
        session_id: &str,
        stream: &str,
        text: &str,
        kind: Option<&str>,
        is_final: bool,
    );

    /// Fatal runner failure; transitions the session to ERROR (idempotent).
    async fn on_error(&self, session_id: &str, code: &str, message: &str);

    /// Process exit. Null or zero codes are no-ops, as are nonzero codes
    /// while AWAITING_INPUT or INTERRUPTING; anything else fails the session.
    async fn on_exit(&self, session_id: &str, exit_code: Option<i32>);

    /// Turn finished; RUNNING sessions move to AWAITING_INPUT.
    async fn on_awaiting_input(&self, session_id: &str);

    /// Telemetry key/value from the runner.
    async fn on_metadata(&self, session_id: &str, key: &str, value: Value, raw: &str);

    /// Periodic liveness signal while a turn streams.
    async fn on_heartbeat(&self, session_id: &str, elapsed_s: f64, done: bool);

    /// A tool invocation needs human approval. Emits the event, registers
    /// the pending future, and arms the auto-deny timeout. Returns the
    /// future the runner may await; `None` when the session is unknown.
    async fn on_permission_request(
        &self,
        session_id: &str,
        request_id: &str,
        tool_name: &str,
        tool_input: Value,
        suggestions: Option<Value>,
    ) -> Option<oneshot::Receiver<PermissionResult>>;

    /// A permission request was decided; logs the resolution event.
    async fn on_permission_resolved(
        &self,
        session_id: &str,
        request_id: &str,
        resolved_by: &str,
        allowed: bool,
        message: Option<&str>,
    );
}
