//! Platform-agnostic chat command handling.
//!
//! Incoming text from a session thread is either plain input for the
//! agent, a `deny: <reason>` answer to a pending approval, or a `!`
//! control command. All effects go through the HTTP API rather than the
//! store, so bridges cannot re-enter the core.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::session::models::Session;

use super::pairing::PairingGuard;

/// State emoji used in status and list replies.
fn state_emoji(state: &str) -> &'static str {
    match state {
        "CREATED" => "🆕",
        "RUNNING" => "🔄",
        "AWAITING_INPUT" => "📝",
        "INTERRUPTING" => "⏳",
        "STOPPING" => "🛑",
        "STOPPED" => "✅",
        "ERROR" => "❌",
        _ => "ℹ️",
    }
}

/// A parsed chat message from a session thread or the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    Help,
    Status,
    List { query: Option<String> },
    Attach { target: String },
    Stop,
    Pair { code: String },
    /// `deny: <reason>` answering the pending approval.
    Deny { reason: String },
    /// Anything else: forward as agent input.
    Input { text: String },
}

impl BridgeCommand {
    /// Parse a raw chat message.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if let Some(reason) = trimmed.strip_prefix("deny:") {
            return Self::Deny {
                reason: reason.trim().to_string(),
            };
        }
        let Some(command) = trimmed.strip_prefix('!') else {
            return Self::Input {
                text: trimmed.to_string(),
            };
        };
        let mut parts = command.splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or_default().to_lowercase();
        let args = parts.next().unwrap_or("").trim();
        match verb.as_str() {
            "help" | "start" => Self::Help,
            "status" | "sessions" => Self::Status,
            "list" => Self::List {
                query: (!args.is_empty()).then(|| args.to_string()),
            },
            "attach" => Self::Attach {
                target: args.to_string(),
            },
            "stop" => Self::Stop,
            "pair" => Self::Pair {
                code: args.to_string(),
            },
            _ => Self::Input {
                text: trimmed.to_string(),
            },
        }
    }
}

/// HTTP client for the session API, used by bridges for command effects.
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let body: Value = self
            .request(reqwest::Method::GET, "/api/sessions")
            .send()
            .await
            .context("listing sessions")?
            .error_for_status()?
            .json()
            .await?;
        let sessions = body
            .get("sessions")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        Ok(serde_json::from_value(sessions)?)
    }

    pub async fn send_input(&self, session_id: &str, text: &str) -> Result<()> {
        self.request(
            reqwest::Method::POST,
            &format!("/api/sessions/{session_id}/input"),
        )
        .json(&json!({"text": text}))
        .send()
        .await
        .context("sending input")?
        .error_for_status()?;
        Ok(())
    }

    /// Returns false when the request was already resolved (HTTP 404).
    pub async fn resolve_permission(
        &self,
        session_id: &str,
        request_id: &str,
        allow: bool,
        message: Option<&str>,
    ) -> Result<bool> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/sessions/{session_id}/permission"),
            )
            .json(&json!({
                "request_id": request_id,
                "allow": allow,
                "message": message,
            }))
            .send()
            .await
            .context("resolving permission")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        self.request(
            reqwest::Method::POST,
            &format!("/api/sessions/{session_id}/stop"),
        )
        .send()
        .await
        .context("stopping session")?
        .error_for_status()?;
        Ok(())
    }
}

/// Routes parsed commands to API calls and renders reply text.
pub struct CommandRouter {
    client: ApiClient,
    pairing: PairingGuard,
}

impl CommandRouter {
    pub fn new(client: ApiClient, pairing: PairingGuard) -> Self {
        Self { client, pairing }
    }

    pub fn pairing(&self) -> &PairingGuard {
        &self.pairing
    }

    /// Handle a message typed in a session thread.
    ///
    /// `pending_request_id` is the approval the bridge is currently
    /// showing, if any. Returns the reply to post back, when one is due.
    pub async fn handle_session_message(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
        pending_request_id: Option<&str>,
    ) -> Result<Option<String>> {
        let command = BridgeCommand::parse(text);

        if let BridgeCommand::Pair { code } = &command {
            return Ok(Some(if self.pairing.try_pair(user_id, code) {
                "Paired. Commands are now accepted.".to_string()
            } else {
                "Invalid pairing code.".to_string()
            }));
        }
        if !self.pairing.is_authorized(user_id) {
            return Ok(Some(
                "Not paired. Send `!pair <code>` with the code from the server log.".to_string(),
            ));
        }

        match command {
            BridgeCommand::Help => Ok(Some(help_text())),
            BridgeCommand::Status => {
                let sessions = self.client.list_sessions().await?;
                Ok(Some(render_session_list(&sessions, None)))
            }
            BridgeCommand::List { query } => {
                let sessions = self.client.list_sessions().await?;
                Ok(Some(render_session_list(&sessions, query.as_deref())))
            }
            BridgeCommand::Stop => {
                self.client.stop_session(session_id).await?;
                Ok(Some("Stop requested.".to_string()))
            }
            BridgeCommand::Deny { reason } => {
                let Some(request_id) = pending_request_id else {
                    return Ok(Some("No approval is pending.".to_string()));
                };
                let message = format!("deny: {reason} by {user_id}");
                let resolved = self
                    .client
                    .resolve_permission(session_id, request_id, false, Some(&message))
                    .await?;
                Ok(Some(if resolved {
                    format!("Denied: {reason}")
                } else {
                    "Already resolved.".to_string()
                }))
            }
            BridgeCommand::Attach { target } => Ok(Some(format!(
                "Attach is a control-channel command; use it there to bind thread → session {target}."
            ))),
            BridgeCommand::Pair { .. } => unreachable!("handled above"),
            BridgeCommand::Input { text } => {
                if text.is_empty() {
                    return Ok(None);
                }
                match self.client.send_input(session_id, &text).await {
                    Ok(()) => {
                        info!(session_id, user_id, "Forwarded chat input");
                        Ok(None)
                    }
                    Err(err) => {
                        warn!(session_id, error = %err, "Failed to forward chat input");
                        Ok(Some("Failed to send input.".to_string()))
                    }
                }
            }
        }
    }
}

fn help_text() -> String {
    [
        "Commands:",
        "!status - list sessions and their states",
        "!list [query] - list sessions matching a query",
        "!attach <id> - bind this thread to a session (control channel)",
        "!stop - stop this thread's session",
        "deny: <reason> - deny the pending approval with a reason",
        "Anything else is sent to the agent as input.",
    ]
    .join("\n")
}

fn render_session_list(sessions: &[Session], query: Option<&str>) -> String {
    let mut lines = Vec::new();
    for session in sessions {
        let name = session.name.as_deref().unwrap_or("(unnamed)");
        if let Some(query) = query {
            let query = query.to_lowercase();
            if !name.to_lowercase().contains(&query)
                && !session.repo_display.to_lowercase().contains(&query)
            {
                continue;
            }
        }
        lines.push(format!(
            "{} {} - {} ({})",
            state_emoji(session.state.as_str()),
            session.id,
            name,
            session.state
        ));
    }
    if lines.is_empty() {
        "No sessions.".to_string()
    } else {
        lines.join("\n")
    }
}
