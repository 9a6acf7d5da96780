//! External agent endpoints (REST and WebSocket).
//!
//! External agents are programs that bring their own execution loop and
//! use minder only for the human side: a chat thread, approvals, and an
//! event mailbox. They register, bind a session to a platform thread, and
//! then stream events / poll for human responses.

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use minder_protocol::{
    AgentMetadata, AgentToServer, ApprovalRequest, EventType, PermissionResult, ServerToAgent,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::session::now_ts;
use crate::session::state::clean_name;

const DEFAULT_PLATFORM: &str = "telegram";

fn new_agent_id() -> String {
    format!("agent_{}", &Uuid::new_v4().simple().to_string()[..8])
}

#[derive(Debug, Deserialize)]
pub struct CreateExternalSessionBody {
    pub agent_metadata: AgentMetadata,
    pub session_name: String,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Create a session for an external agent and bind a chat thread.
#[instrument(skip_all, fields(agent = %body.agent_metadata.name))]
pub async fn create_external_session(
    State(state): State<AppState>,
    Json(body): Json<CreateExternalSessionBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let platform = body
        .platform
        .clone()
        .unwrap_or_else(|| DEFAULT_PLATFORM.to_string());

    let session = state.store.create_session("external_agent", None).await?;
    let session_id = session.id.clone();
    let (session_id, thread_info) = bind_external_session(
        &state,
        session_id,
        &body.agent_metadata,
        new_agent_id(),
        &body.session_name,
        &platform,
    )
    .await
    .map_err(|err| {
        // Platform not configured: the half-made session must not linger.
        let state = state.clone();
        let orphan = session.id.clone();
        tokio::spawn(async move {
            let _ = state.store.delete_session(&orphan).await;
        });
        ApiError::validation(err.to_string())
    })?;

    info!(session_id, platform, "External session created");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session_id": session_id,
            "platform": platform,
            "thread_info": thread_info,
        })),
    ))
}

/// Attach agent identity and a platform thread to a fresh session.
async fn bind_external_session(
    state: &AppState,
    session_id: String,
    metadata: &AgentMetadata,
    agent_id: String,
    session_name: &str,
    platform: &str,
) -> anyhow::Result<(String, Value)> {
    let mut session = state
        .store
        .get_session(&session_id)
        .ok_or_else(|| anyhow::anyhow!("session vanished during creation"))?;
    session.external_agent_id = Some(agent_id);
    session.external_agent_name = Some(metadata.name.clone());
    session.external_agent_type = Some(metadata.agent_type.clone());
    session.external_agent_icon = Some(metadata.icon.clone());
    session.external_agent_workspace = metadata.workspace.clone();
    let cleaned = clean_name(session_name);
    if !cleaned.is_empty() {
        session.name = Some(cleaned);
    }
    session.platform = Some(platform.to_string());
    state.store.update_session(session.clone()).await?;

    let thread_info = state
        .bridges
        .create_thread(&session_id, session_name, platform)
        .await?;
    session.platform_thread_id = thread_info
        .get("thread_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    state.store.update_session(session).await?;

    state.bridge_subscriber.subscribe(&session_id, platform);
    Ok((session_id, thread_info))
}

#[derive(Debug, Deserialize)]
pub struct AgentEventBody {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Post an event from an external agent; routed straight to the bridge.
#[instrument(skip(state, body), fields(event_type = %body.event_type))]
pub async fn post_agent_event(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    Json(body): Json<AgentEventBody>,
) -> ApiResult<Json<Value>> {
    let session = state
        .store
        .get_session(&session_id)
        .ok_or_else(|| ApiError::not_found("Session not found"))?;
    let Some(platform) = session.platform.clone() else {
        return Err(ApiError::validation("Session has no platform binding"));
    };

    route_agent_event(&state, &session_id, &platform, &body.event_type, &body.data)
        .await
        .map_err(|err| ApiError::validation(err.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

async fn route_agent_event(
    state: &AppState,
    session_id: &str,
    platform: &str,
    event_type: &str,
    data: &Value,
) -> anyhow::Result<()> {
    match event_type {
        "output" => {
            let text = data.get("text").and_then(|v| v.as_str()).unwrap_or("");
            let metadata = data.get("metadata");
            state
                .bridges
                .route_output(session_id, text, platform, metadata)
                .await
        }
        "approval_request" => {
            let request: ApprovalRequest = serde_json::from_value(
                data.get("request").cloned().unwrap_or_else(|| data.clone()),
            )?;
            state
                .bridges
                .route_approval(session_id, &request, platform)
                .await
        }
        "status" => {
            let status = data.get("status").and_then(|v| v.as_str()).unwrap_or("");
            let metadata = data.get("metadata");
            state
                .bridges
                .route_status(session_id, status, platform, metadata)
                .await
        }
        other => anyhow::bail!("Unknown event type: {other}"),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PendingEventsQuery {
    #[serde(default)]
    pub since_seq: u64,
}

/// Events an agent polls for: human input and approval responses.
fn agent_relevant_events(state: &AppState, session_id: &str, since_seq: u64) -> Vec<Value> {
    state
        .store
        .read_event_log(session_id, since_seq, None)
        .into_iter()
        .filter(|event| {
            matches!(
                event.event_type,
                EventType::HumanInput | EventType::ApprovalResponse
            )
        })
        .map(|event| serde_json::to_value(event).unwrap_or(Value::Null))
        .collect()
}

/// Poll for pending human input / approval responses.
#[instrument(skip(state, query))]
pub async fn get_pending_events(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    Query(query): Query<PendingEventsQuery>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .get_session(&session_id)
        .ok_or_else(|| ApiError::not_found("Session not found"))?;
    Ok(Json(json!({
        "events": agent_relevant_events(&state, &session_id, query.since_seq)
    })))
}

/// Respond to an external agent's approval request (called by bridges).
#[instrument(skip(state, body))]
pub async fn respond_to_approval(
    State(state): State<AppState>,
    UrlPath((session_id, request_id)): UrlPath<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .get_session(&session_id)
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    let option_selected = body
        .get("option_selected")
        .and_then(|v| v.as_str())
        .unwrap_or("Deny");
    let allowed = matches!(
        option_selected.to_lowercase().as_str(),
        "allow" | "yes" | "approve"
    );
    let result = PermissionResult {
        allowed,
        option_selected: Some(option_selected.to_string()),
        message: body
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        resolved_by: body
            .get("username")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    };

    if !state
        .store
        .resolve_pending_permission(&session_id, &request_id, result)
    {
        return Err(ApiError::not_found(
            "Approval request not found or already resolved",
        ));
    }

    let mut data = json!({ "request_id": request_id });
    if let Some(object) = body.as_object() {
        for (key, value) in object {
            data[key] = value.clone();
        }
    }
    let _ = state
        .store
        .emit(&session_id, EventType::ApprovalResponse, data);
    Ok(Json(json!({ "ok": true })))
}

/// WebSocket endpoint for external agents.
pub async fn agent_websocket(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_agent_socket(state, socket))
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerToAgent) -> bool {
    match serde_json::to_string(frame) {
        Ok(raw) => socket.send(Message::Text(raw.into())).await.is_ok(),
        Err(_) => false,
    }
}

async fn handle_agent_socket(state: AppState, mut socket: WebSocket) {
    let mut agent_id: Option<String> = None;
    let mut metadata: Option<AgentMetadata> = None;
    let mut session_id: Option<String> = None;

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(raw) = message else {
            continue;
        };
        let frame: AgentToServer = match serde_json::from_str(&raw) {
            Ok(frame) => frame,
            Err(err) => {
                let _ = send_frame(
                    &mut socket,
                    &ServerToAgent::Error {
                        message: format!("Invalid frame: {err}"),
                    },
                )
                .await;
                continue;
            }
        };

        // The first frame on the socket must be a registration.
        if agent_id.is_none() {
            match frame {
                AgentToServer::Register { agent_metadata } => {
                    let id = new_agent_id();
                    info!(agent_id = %id, agent = %agent_metadata.name, "Agent registered via WebSocket");
                    metadata = Some(agent_metadata);
                    let _ = send_frame(
                        &mut socket,
                        &ServerToAgent::Registered {
                            agent_id: id.clone(),
                        },
                    )
                    .await;
                    agent_id = Some(id);
                    continue;
                }
                _ => {
                    let _ = send_frame(
                        &mut socket,
                        &ServerToAgent::Error {
                            message: "First message must be registration".to_string(),
                        },
                    )
                    .await;
                    return;
                }
            }
        }

        match frame {
            AgentToServer::Register { .. } => {
                let _ = send_frame(
                    &mut socket,
                    &ServerToAgent::Error {
                        message: "Already registered".to_string(),
                    },
                )
                .await;
            }
            AgentToServer::CreateSession {
                session_name,
                platform,
            } => {
                let name = session_name.unwrap_or_else(|| "External Agent Session".to_string());
                let platform = platform.unwrap_or_else(|| DEFAULT_PLATFORM.to_string());
                let meta = metadata.clone().unwrap_or(AgentMetadata {
                    name: "External Agent".to_string(),
                    agent_type: "unknown".to_string(),
                    icon: "🤖".to_string(),
                    workspace: None,
                });

                let created = match state.store.create_session("external_agent", None).await {
                    Ok(session) => session,
                    Err(err) => {
                        let _ = send_frame(
                            &mut socket,
                            &ServerToAgent::Error {
                                message: err.to_string(),
                            },
                        )
                        .await;
                        continue;
                    }
                };
                match bind_external_session(
                    &state,
                    created.id.clone(),
                    &meta,
                    agent_id.clone().unwrap_or_else(new_agent_id),
                    &name,
                    &platform,
                )
                .await
                {
                    Ok((id, thread_info)) => {
                        session_id = Some(id.clone());
                        let _ = send_frame(
                            &mut socket,
                            &ServerToAgent::SessionCreated {
                                session_id: id,
                                thread_info,
                            },
                        )
                        .await;
                    }
                    Err(err) => {
                        let _ = state.store.delete_session(&created.id).await;
                        let _ = send_frame(
                            &mut socket,
                            &ServerToAgent::Error {
                                message: err.to_string(),
                            },
                        )
                        .await;
                    }
                }
            }
            AgentToServer::Event { data } => {
                let Some(session) = session_id.as_deref().and_then(|id| state.store.get_session(id))
                else {
                    let _ = send_frame(
                        &mut socket,
                        &ServerToAgent::Error {
                            message: "No active session".to_string(),
                        },
                    )
                    .await;
                    continue;
                };
                let Some(platform) = session.platform.clone() else {
                    let _ = send_frame(
                        &mut socket,
                        &ServerToAgent::Error {
                            message: "Invalid session".to_string(),
                        },
                    )
                    .await;
                    continue;
                };
                let event_type = data
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if let Err(err) =
                    route_agent_event(&state, &session.id, &platform, &event_type, &data).await
                {
                    warn!(session_id = %session.id, error = %err, "Agent event routing failed");
                }
                let _ = send_frame(&mut socket, &ServerToAgent::Ack).await;
            }
            AgentToServer::PollEvents { since_seq } => {
                let events = match session_id.as_deref() {
                    Some(id) => state
                        .store
                        .read_event_log(id, since_seq, None)
                        .into_iter()
                        .filter(|event| {
                            matches!(
                                event.event_type,
                                EventType::HumanInput | EventType::ApprovalResponse
                            )
                        })
                        .collect(),
                    None => Vec::new(),
                };
                let _ = send_frame(&mut socket, &ServerToAgent::Events { events }).await;
            }
        }
    }

    // Transport dropped: the session persists, subscribers get a notice.
    info!(?agent_id, ?session_id, "Agent disconnected");
    if let Some(session_id) = session_id {
        let _ = state.store.emit(
            &session_id,
            EventType::AgentDisconnected,
            json!({"agent_id": agent_id, "ts": now_ts()}),
        );
    }
}
