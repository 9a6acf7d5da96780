//! Bridge subscriber: routes store events to platform bridges.
//!
//! For each session bound to a platform, one cooperative task consumes the
//! session's live event queue and translates events into bridge calls. A
//! failing bridge call is logged and consumption continues; a single
//! failure must never stop the subscriber.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use minder_protocol::{ApprovalRequest, EventEnvelope, EventType, SessionState};

use crate::store::SessionStore;

use super::BridgeInterface;
use super::manager::BridgeManager;

pub struct BridgeSubscriber {
    store: Arc<SessionStore>,
    manager: Arc<BridgeManager>,
    tasks: DashMap<String, JoinHandle<()>>,
}

impl BridgeSubscriber {
    pub fn new(store: Arc<SessionStore>, manager: Arc<BridgeManager>) -> Self {
        Self {
            store,
            manager,
            tasks: DashMap::new(),
        }
    }

    /// Start consuming store events for a session and routing to a bridge.
    ///
    /// Idempotent: a second subscribe for the same session is a no-op.
    pub fn subscribe(&self, session_id: &str, platform: &str) {
        if self.tasks.contains_key(session_id) {
            return;
        }
        let store = Arc::clone(&self.store);
        let manager = Arc::clone(&self.manager);
        let session = session_id.to_string();
        let platform_owned = platform.to_string();
        let task = tokio::spawn(async move {
            consume(store, manager, session, platform_owned).await;
        });
        self.tasks.insert(session_id.to_string(), task);
        info!(session_id, platform, "Bridge subscriber started");
    }

    /// Stop consuming events for a session.
    ///
    /// When `notify_platform` is given, the bridge's `on_session_removed`
    /// fires so it can annotate or close the thread.
    pub async fn unsubscribe(&self, session_id: &str, notify_platform: Option<&str>) {
        if let Some((_, task)) = self.tasks.remove(session_id) {
            task.abort();
            info!(session_id, "Bridge subscriber stopped");
        }
        if let Some(platform) = notify_platform
            && let Some(bridge) = self.manager.get_bridge(platform)
            && let Err(err) = bridge.on_session_removed(session_id).await
        {
            warn!(session_id, platform, error = %err, "Bridge removal notification failed");
        }
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.tasks.contains_key(session_id)
    }
}

/// Background loop reading from a store subscriber queue.
async fn consume(
    store: Arc<SessionStore>,
    manager: Arc<BridgeManager>,
    session_id: String,
    platform: String,
) {
    let (subscriber_id, mut rx) = store.new_subscriber(&session_id);
    let Some(bridge) = manager.get_bridge(&platform) else {
        warn!(session_id, platform, "No bridge for platform, subscriber exiting");
        store.remove_subscriber(&session_id, subscriber_id);
        return;
    };

    while let Some(event) = rx.recv().await {
        if event.is_history() {
            continue;
        }
        if let Err(err) = route_event(bridge.as_ref(), &session_id, &event).await {
            warn!(
                session_id,
                event_type = %event.event_type,
                error = %err,
                "Failed to route event to bridge"
            );
        }
    }
    store.remove_subscriber(&session_id, subscriber_id);
}

/// Translate one event into the matching bridge call.
async fn route_event(
    bridge: &dyn BridgeInterface,
    session_id: &str,
    event: &EventEnvelope,
) -> anyhow::Result<()> {
    match event.event_type {
        EventType::Output => {
            let text = event.text().unwrap_or_default();
            if !text.is_empty() && event.is_final() {
                bridge.on_output(session_id, text, None).await?;
            }
        }
        // The accumulated blob duplicates the final output; forwarding it
        // would double-send every turn.
        EventType::OutputFinal => {}
        EventType::PermissionRequest => {
            let request_id = event
                .data
                .get("request_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let tool_name = event
                .data
                .get("tool_name")
                .and_then(|v| v.as_str())
                .unwrap_or("Permission request");
            let tool_input = event
                .data
                .get("tool_input")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let request = ApprovalRequest::for_tool(request_id, tool_name, &tool_input);
            bridge.on_approval_request(session_id, &request).await?;
        }
        EventType::SessionState => {
            let state = event
                .data
                .get("state")
                .and_then(|v| v.as_str())
                .and_then(SessionState::parse);
            match state {
                Some(SessionState::Running) => bridge.on_typing(session_id).await?,
                Some(SessionState::Error) => {
                    bridge.on_status_change(session_id, "error", None).await?
                }
                // AWAITING_INPUT: let the typing indicator lapse naturally.
                _ => {}
            }
        }
        EventType::Error => {
            let message = event
                .data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");
            bridge
                .on_status_change(
                    session_id,
                    "error",
                    Some(&serde_json::json!({"message": message})),
                )
                .await?;
        }
        _ => {}
    }
    Ok(())
}
