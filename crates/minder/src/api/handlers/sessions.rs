//! Session lifecycle endpoints.

use std::path::Path;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use minder_protocol::{EventType, PermissionResult, SessionState};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::fsutil::normalize_directory_path;
use crate::session::models::Session;
use crate::session::{maybe_set_session_name, now_ts, state::clean_name, transition};

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub base_ref: Option<String>,
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

fn require_session(state: &AppState, session_id: &str) -> ApiResult<Session> {
    state
        .store
        .get_session(session_id)
        .ok_or_else(|| ApiError::not_found("Session not found"))
}

async fn persist_and_emit_state(state: &AppState, session: &Session) -> ApiResult<()> {
    state.store.update_session(session.clone()).await?;
    state
        .store
        .emit_state(session)
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(())
}

/// List all sessions in memory.
#[instrument(skip_all)]
pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sessions = state.store.list_sessions();
    info!(count = sessions.len(), "Listed sessions");
    Ok(Json(json!({ "sessions": sessions })))
}

/// Create a new session in CREATED state.
#[instrument(skip_all, fields(repo_id = ?body.repo_id, directory = ?body.directory))]
pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let normalized_directory = match &body.directory {
        Some(directory) => {
            let normalized = normalize_directory_path(directory);
            if !Path::new(&normalized).is_dir() {
                return Err(ApiError::validation("directory must be an existing folder"));
            }
            Some(normalized)
        }
        None => None,
    };

    if let Some(adapter) = &body.adapter {
        state
            .registry
            .validate_adapter(adapter)
            .map_err(|err| ApiError::validation(err.to_string()))?;
    }

    let repo_id = body
        .repo_id
        .clone()
        .or_else(|| normalized_directory.clone())
        .unwrap_or_else(|| "repo_local".to_string());
    let mut session = state.store.create_session(&repo_id, body.base_ref.clone()).await?;

    session.adapter = body.adapter.clone();
    session.external_agent_name = body.agent_name.clone();
    session.external_agent_type = body.agent_type.clone();
    session.platform = body.platform.clone();
    if let Some(name) = &body.session_name {
        let cleaned = clean_name(name);
        if !cleaned.is_empty() {
            session.name = Some(cleaned);
        }
    }
    if let Some(directory) = &normalized_directory {
        session.repo_display = directory.clone();
    }
    state.store.update_session(session.clone()).await?;

    if let Some(directory) = &normalized_directory {
        state.store.set_workdir(&session.id, directory, false).await?;
    }
    if let Some(platform) = &body.platform {
        state.bridge_subscriber.subscribe(&session.id, platform);
    }

    let session = require_session(&state, &session.id)?;
    info!(session_id = %session.id, "Session created");
    Ok((StatusCode::CREATED, Json(json!({ "session": session }))))
}

/// Fetch a single session by id.
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &session_id)?;
    Ok(Json(json!({ "session": session })))
}

/// Delete a session if it is not active.
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &session_id)?;
    if matches!(
        session.state,
        SessionState::Running | SessionState::Stopping
    ) {
        return Err(ApiError::invalid_state("Session is active"));
    }
    state
        .bridge_subscriber
        .unsubscribe(&session_id, session.platform.as_deref())
        .await;
    state.store.delete_session(&session_id).await?;
    info!(session_id, "Session deleted");
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct StartSessionBody {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_approval_choice")]
    pub approval_choice: u8,
}

fn default_approval_choice() -> u8 {
    1
}

/// Start a session and launch the runner's first turn.
#[instrument(skip(state, body))]
pub async fn start_session(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    Json(body): Json<StartSessionBody>,
) -> ApiResult<Json<Value>> {
    let mut session = require_session(&state, &session_id)?;
    if session.state != SessionState::Created {
        return Err(ApiError::invalid_state("Session not in CREATED state"));
    }
    if !matches!(body.approval_choice, 1 | 2) {
        return Err(ApiError::validation("approval_choice must be 1 or 2"));
    }

    state.store.clear_runner_session_id(&session_id).await?;
    if state.store.get_workdir(&session_id).is_none() {
        state.store.create_workdir(&session_id).await?;
    }

    let mut session_now = require_session(&state, &session_id)?;
    transition(&mut session_now, SessionState::Running);
    maybe_set_session_name(&mut session_now, &body.prompt);
    persist_and_emit_state(&state, &session_now).await?;
    session = session_now;

    let runner = state
        .registry
        .get_runner(session.adapter.as_deref())
        .await
        .map_err(|err| ApiError::validation(err.to_string()))?;
    if let Err(err) = runner
        .start(&session_id, &body.prompt, body.approval_choice)
        .await
    {
        // A session with no live turn must not stay RUNNING.
        if let Some(mut failed) = state.store.get_session(&session_id)
            && transition(&mut failed, SessionState::Error)
        {
            persist_and_emit_state(&state, &failed).await?;
            let _ = state.store.emit(
                &session_id,
                EventType::Error,
                json!({"code": "START_FAILED", "message": err.to_string()}),
            );
        }
        return Err(ApiError::Internal(err.to_string()));
    }

    info!(session_id, "Session started");
    Ok(Json(json!({ "session": session })))
}

#[derive(Debug, Deserialize)]
pub struct InputBody {
    pub text: String,
}

/// Send input to a session awaiting it (or still running).
#[instrument(skip(state, body))]
pub async fn send_input(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    Json(body): Json<InputBody>,
) -> ApiResult<Json<Value>> {
    if body.text.trim().is_empty() {
        return Err(ApiError::validation("text is required"));
    }
    let mut session = require_session(&state, &session_id)?;
    match session.state {
        SessionState::Running => {}
        SessionState::AwaitingInput => {
            // New input resumes the turn loop.
            transition(&mut session, SessionState::Running);
            persist_and_emit_state(&state, &session).await?;
        }
        _ => return Err(ApiError::invalid_state("Session not running")),
    }

    if maybe_set_session_name(&mut session, &body.text) {
        state.store.update_session(session.clone()).await?;
    }

    let runner = state
        .registry
        .get_runner(session.adapter.as_deref())
        .await
        .map_err(|err| ApiError::validation(err.to_string()))?;
    runner.send_input(&session_id, &body.text).await?;

    let _ = state.store.emit(
        &session_id,
        EventType::HumanInput,
        json!({"text": body.text, "source": "api"}),
    );

    if let Some(mut session) = state.store.get_session(&session_id) {
        session.last_activity_at = now_ts();
        state.store.update_session(session.clone()).await?;
        return Ok(Json(json!({ "session": session })));
    }
    Ok(Json(json!({ "session": session })))
}

/// Common tail for stop/interrupt: run the runner stop under a timeout and
/// finalize the session state.
async fn stop_runner_and_finalize(state: &AppState, session_id: &str) -> ApiResult<Session> {
    let session = require_session(state, session_id)?;
    let runner = state
        .registry
        .get_runner(session.adapter.as_deref())
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let stop_timeout = Duration::from_secs(state.settings.stop_timeout_s);
    let outcome = tokio::time::timeout(stop_timeout, runner.stop(session_id)).await;

    let mut session = require_session(state, session_id)?;
    match outcome {
        Ok(Ok(exit_code)) => {
            if !session.state.is_terminal() && transition(&mut session, SessionState::Stopped) {
                session.exit_code = exit_code;
                persist_and_emit_state(state, &session).await?;
            }
        }
        Ok(Err(err)) => {
            warn!(session_id, error = %err, "Runner stop failed");
            if transition(&mut session, SessionState::Error) {
                persist_and_emit_state(state, &session).await?;
                let _ = state.store.emit(
                    session_id,
                    EventType::Error,
                    json!({"code": "STOP_FAILED", "message": err.to_string()}),
                );
            }
        }
        Err(_) => {
            warn!(session_id, "Runner stop timed out");
            if transition(&mut session, SessionState::Error) {
                persist_and_emit_state(state, &session).await?;
                let _ = state.store.emit(
                    session_id,
                    EventType::Error,
                    json!({"code": "STOP_TIMEOUT", "message": "Runner did not stop in time"}),
                );
            }
        }
    }
    require_session(state, session_id)
}

/// Stop a session (idempotent beyond terminal states).
#[instrument(skip(state))]
pub async fn stop_session(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let mut session = require_session(&state, &session_id)?;
    if session.state.is_terminal() {
        info!(session_id, "Stop requested for terminal session");
        return Ok(Json(json!({ "session": session })));
    }
    if session.state == SessionState::Created {
        return Err(ApiError::invalid_state("Session not running"));
    }
    if matches!(
        session.state,
        SessionState::Running | SessionState::AwaitingInput
    ) && transition(&mut session, SessionState::Stopping)
    {
        persist_and_emit_state(&state, &session).await?;
    }

    let session = stop_runner_and_finalize(&state, &session_id).await?;
    info!(session_id, exit_code = ?session.exit_code, "Session stopped");
    Ok(Json(json!({ "session": session })))
}

/// Interrupt a running turn without tearing the session down hard.
#[instrument(skip(state))]
pub async fn interrupt_session(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let mut session = require_session(&state, &session_id)?;
    if !matches!(
        session.state,
        SessionState::Running | SessionState::AwaitingInput
    ) {
        return Err(ApiError::invalid_state("Session not interruptible"));
    }
    if transition(&mut session, SessionState::Interrupting) {
        persist_and_emit_state(&state, &session).await?;
    }

    let session = stop_runner_and_finalize(&state, &session_id).await?;
    info!(session_id, "Session interrupted");
    Ok(Json(json!({ "session": session })))
}

#[derive(Debug, Deserialize)]
pub struct PermissionBody {
    pub request_id: String,
    pub allow: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Resolve a pending permission request. First writer wins.
#[instrument(skip(state, body), fields(request_id = %body.request_id))]
pub async fn resolve_permission(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    Json(body): Json<PermissionBody>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &session_id)?;

    let result = PermissionResult {
        allowed: body.allow,
        option_selected: Some(if body.allow { "Allow" } else { "Deny" }.to_string()),
        message: body.message.clone(),
        resolved_by: Some("user".to_string()),
    };
    if !state
        .store
        .resolve_pending_permission(&session_id, &body.request_id, result)
    {
        return Err(ApiError::not_found(
            "Approval request not found or already resolved",
        ));
    }

    let mut data = json!({
        "request_id": body.request_id,
        "allowed": body.allow,
        "resolved_by": "user",
    });
    if let Some(message) = &body.message {
        data["message"] = Value::String(message.clone());
    }
    let _ = state
        .store
        .emit(&session_id, EventType::PermissionResolved, data);

    info!(session_id, allow = body.allow, "Permission resolved");
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct ApprovalModeBody {
    pub approval_mode: String,
}

/// Change the runner's approval policy mid-session.
#[instrument(skip(state, body))]
pub async fn set_approval_mode(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    Json(body): Json<ApprovalModeBody>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &session_id)?;
    if session.state.is_terminal() {
        return Err(ApiError::invalid_state("Session already ended"));
    }
    let runner = state
        .registry
        .get_runner(session.adapter.as_deref())
        .await
        .map_err(|err| ApiError::validation(err.to_string()))?;
    runner
        .update_permission_mode(&session_id, &body.approval_mode)
        .await?;
    info!(session_id, mode = %body.approval_mode, "Approval mode updated");
    Ok(Json(json!({ "session": session })))
}

#[derive(Debug, Deserialize)]
pub struct RenameBody {
    #[serde(default)]
    pub name: String,
}

/// Rename an existing session.
#[instrument(skip(state, body))]
pub async fn rename_session(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    Json(body): Json<RenameBody>,
) -> ApiResult<Json<Value>> {
    let mut session = require_session(&state, &session_id)?;
    let cleaned = clean_name(&body.name);
    if cleaned.is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    session.name = Some(cleaned);
    state.store.update_session(session.clone()).await?;
    info!(session_id, name = ?session.name, "Session renamed");
    Ok(Json(json!({ "session": session })))
}

/// Aggregate token and cost usage for a session.
#[instrument(skip(state))]
pub async fn get_usage(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &session_id)?;
    let usage = state.store.session_usage(&session_id);
    Ok(Json(serde_json::to_value(usage).map_err(|err| {
        ApiError::Internal(err.to_string())
    })?))
}

/// Placeholder diff output until workspace diffing lands.
const PLACEHOLDER_DIFF: &str = "\
diff --git a/README.md b/README.md
index 2bce3a1..d93c7c0 100644
--- a/README.md
+++ b/README.md
@@ -1,3 +1,4 @@
 # Project
+Supervised by minder.
 ";

/// Return a structured file-diff list for a session.
#[instrument(skip(state))]
pub async fn get_diff(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &session_id)?;
    Ok(Json(json!({
        "diff": PLACEHOLDER_DIFF,
        "files": parse_diff_files(PLACEHOLDER_DIFF),
    })))
}

/// Split a unified diff into per-file summaries with +/- counts.
fn parse_diff_files(diff: &str) -> Vec<Value> {
    let mut files: Vec<Value> = Vec::new();
    let mut current: Option<(String, u64, u64)> = None;
    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git a/") {
            if let Some((path, additions, deletions)) = current.take() {
                files.push(json!({"path": path, "additions": additions, "deletions": deletions}));
            }
            let path = rest.split(" b/").next().unwrap_or(rest).to_string();
            current = Some((path, 0, 0));
        } else if let Some((_, additions, deletions)) = current.as_mut() {
            if line.starts_with('+') && !line.starts_with("+++") {
                *additions += 1;
            } else if line.starts_with('-') && !line.starts_with("---") {
                *deletions += 1;
            }
        }
    }
    if let Some((path, additions, deletions)) = current {
        files.push(json!({"path": path, "additions": additions, "deletions": deletions}));
    }
    files
}
