//! The store-backed implementation of the runner events sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use minder_protocol::{EventType, PermissionResult, SessionState};

use crate::session::{now_ts, transition};
use crate::store::SessionStore;

use super::RunnerEvents;

/// Routes runner callbacks into session state changes and log events.
pub struct ApiRunnerEvents {
    store: Arc<SessionStore>,
    permission_timeout: Duration,
}

impl ApiRunnerEvents {
    pub fn new(store: Arc<SessionStore>, permission_timeout: Duration) -> Self {
        Self {
            store,
            permission_timeout,
        }
    }

    /// Refresh `last_activity_at` and persist, ignoring unknown sessions.
    async fn touch_activity(&self, session_id: &str) {
        if let Some(mut session) = self.store.get_session(session_id) {
            session.last_activity_at = now_ts();
            if let Err(err) = self.store.update_session(session).await {
                warn!(session_id, error = %err, "Failed to persist activity refresh");
            }
        }
    }

    /// Transition the session to ERROR and log the failure, once.
    async fn fail_session(
        &self,
        session_id: &str,
        code: &str,
        message: &str,
        exit_code: Option<i32>,
    ) {
        let Some(mut session) = self.store.get_session(session_id) else {
            return;
        };
        if !transition(&mut session, SessionState::Error) {
            debug!(session_id, state = %session.state, "Error transition skipped");
            return;
        }
        if exit_code.is_some() {
            session.exit_code = exit_code;
        }
        if let Err(err) = self.store.update_session(session.clone()).await {
            warn!(session_id, error = %err, "Failed to persist error state");
        }
        let _ = self.store.emit_state(&session);
        let _ = self.store.emit(
            session_id,
            EventType::Error,
            json!({"code": code, "message": message}),
        );
        info!(session_id, code, "Session failed");
    }
}

#[async_trait]
impl RunnerEvents for ApiRunnerEvents {
    async fn on_header(
        &self,
        session_id: &str,
        title: Option<&str>,
        thread_id: Option<&str>,
        model: Option<&str>,
        provider: Option<&str>,
    ) {
        let Some(mut session) = self.store.get_session(session_id) else {
            return;
        };
        if let Some(title) = title {
            session.runner_header = Some(title.to_string());
            if let Err(err) = self.store.update_session(session).await {
                warn!(session_id, error = %err, "Failed to persist runner header");
            }
        }
        if let Some(thread_id) = thread_id
            && thread_id != "unknown"
            && self.store.get_runner_session_id(session_id).is_none()
        {
            let _ = self.store.set_runner_session_id(session_id, thread_id).await;
        }
        debug!(session_id, ?title, ?model, ?provider, "Runner header received");
    }

    async fn on_output(
        &self,
        session_id: &str,
        stream: &str,
        text: &str,
        kind: Option<&str>,
        is_final: bool,
    ) {
        let Some(mut session) = self.store.get_session(session_id) else {
            return;
        };
        session.last_activity_at = now_ts();

        if kind == Some("header") {
            session.runner_header = Some(text.trim().to_string());
            if let Err(err) = self.store.update_session(session).await {
                warn!(session_id, error = %err, "Failed to persist header output");
            }
            return;
        }
        if let Err(err) = self.store.update_session(session).await {
            warn!(session_id, error = %err, "Failed to persist activity refresh");
        }

        // The accumulated blob repeats text already streamed; only live
        // output goes through the dedup ring.
        let is_blob = kind == Some("output_final");
        if !is_blob && !self.store.should_emit_output(session_id, text) {
            return;
        }

        let event_type = if is_blob {
            EventType::OutputFinal
        } else {
            EventType::Output
        };
        let mut data = json!({
            "stream": stream,
            "text": text,
            "final": is_final,
        });
        if let Some(kind) = kind {
            data["kind"] = Value::String(kind.to_string());
        }
        let _ = self.store.emit(session_id, event_type, data);
    }

    async fn on_error(&self, session_id: &str, code: &str, message: &str) {
        self.fail_session(session_id, code, message, None).await;
    }

    async fn on_exit(&self, session_id: &str, exit_code: Option<i32>) {
        let code = match exit_code {
            None | Some(0) => return,
            Some(code) => code,
        };
        let Some(session) = self.store.get_session(session_id) else {
            return;
        };
        // A nonzero exit after the turn already handed control back (or
        // during an interrupt) is expected process teardown, not a failure.
        if matches!(
            session.state,
            SessionState::AwaitingInput | SessionState::Interrupting
        ) {
            debug!(session_id, code, state = %session.state, "Ignoring exit code");
            return;
        }
        self.fail_session(
            session_id,
            "RUNNER_EXIT",
            &format!("Runner exited with code {code}"),
            Some(code),
        )
        .await;
    }

    async fn on_awaiting_input(&self, session_id: &str) {
        let Some(mut session) = self.store.get_session(session_id) else {
            return;
        };
        if session.state != SessionState::Running {
            return;
        }
        if transition(&mut session, SessionState::AwaitingInput) {
            if let Err(err) = self.store.update_session(session.clone()).await {
                warn!(session_id, error = %err, "Failed to persist awaiting-input state");
            }
            let _ = self.store.emit_state(&session);
        }
    }

    async fn on_metadata(&self, session_id: &str, key: &str, value: Value, raw: &str) {
        self.touch_activity(session_id).await;
        let _ = self.store.emit(
            session_id,
            EventType::Metadata,
            json!({"key": key, "value": value, "raw": raw}),
        );
    }

    async fn on_heartbeat(&self, session_id: &str, elapsed_s: f64, done: bool) {
        self.touch_activity(session_id).await;
        let _ = self.store.emit(
            session_id,
            EventType::Heartbeat,
            json!({"elapsed_s": elapsed_s, "done": done}),
        );
    }

    async fn on_permission_request(
        &self,
        session_id: &str,
        request_id: &str,
        tool_name: &str,
        tool_input: Value,
        suggestions: Option<Value>,
    ) -> Option<oneshot::Receiver<PermissionResult>> {
        self.store.get_session(session_id)?;

        let mut data = json!({
            "request_id": request_id,
            "tool_name": tool_name,
            "tool_input": tool_input,
        });
        if let Some(suggestions) = suggestions {
            data["suggestions"] = suggestions;
        }
        let _ = self
            .store
            .emit(session_id, EventType::PermissionRequest, data);

        let rx = self.store.add_pending_permission(
            session_id,
            request_id,
            tool_name,
            tool_input,
        );

        // Arm the auto-deny timer. Losing the race against a human
        // resolution is fine: resolve returns false and nothing is logged.
        let store = Arc::clone(&self.store);
        let session_id = session_id.to_string();
        let request_id = request_id.to_string();
        let timeout = self.permission_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if store.resolve_pending_permission(&session_id, &request_id, PermissionResult::timeout())
            {
                warn!(session_id, request_id, "Permission request timed out");
                let _ = store.emit(
                    &session_id,
                    EventType::PermissionResolved,
                    json!({
                        "request_id": request_id,
                        "allowed": false,
                        "resolved_by": "timeout",
                        "reason": "timeout",
                    }),
                );
            }
        });

        Some(rx)
    }

    async fn on_permission_resolved(
        &self,
        session_id: &str,
        request_id: &str,
        resolved_by: &str,
        allowed: bool,
        message: Option<&str>,
    ) {
        let mut data = json!({
            "request_id": request_id,
            "resolved_by": resolved_by,
            "allowed": allowed,
        });
        if let Some(message) = message {
            data["message"] = Value::String(message.to_string());
        }
        let _ = self
            .store
            .emit(session_id, EventType::PermissionResolved, data);
    }
}
