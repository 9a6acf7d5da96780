//! External agent REST flow against a recording fake bridge.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use serde_json::{Value, json};

use minder::api::{AppState, create_router};
use minder::bridges::{BridgeInterface, BridgeManager, BridgeSubscriber};
use minder::db::Database;
use minder::runner::{ApiRunnerEvents, RunnerRegistry};
use minder::settings::Settings;
use minder::store::{SessionRepository, SessionStore};
use minder_protocol::ApprovalRequest;

#[derive(Default)]
struct RecordingBridge {
    outputs: Mutex<Vec<(String, String)>>,
    approvals: Mutex<Vec<(String, ApprovalRequest)>>,
    statuses: Mutex<Vec<(String, String)>>,
    threads: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl BridgeInterface for RecordingBridge {
    async fn on_output(
        &self,
        session_id: &str,
        text: &str,
        _metadata: Option<&Value>,
    ) -> anyhow::Result<()> {
        self.outputs
            .lock()
            .unwrap()
            .push((session_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn on_approval_request(
        &self,
        session_id: &str,
        request: &ApprovalRequest,
    ) -> anyhow::Result<()> {
        self.approvals
            .lock()
            .unwrap()
            .push((session_id.to_string(), request.clone()));
        Ok(())
    }

    async fn on_status_change(
        &self,
        session_id: &str,
        status: &str,
        _metadata: Option<&Value>,
    ) -> anyhow::Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((session_id.to_string(), status.to_string()));
        Ok(())
    }

    async fn create_thread(&self, session_id: &str, session_name: &str) -> anyhow::Result<Value> {
        self.threads
            .lock()
            .unwrap()
            .push((session_id.to_string(), session_name.to_string()));
        Ok(json!({"thread_id": format!("topic_{session_id}"), "platform": "telegram"}))
    }
}

struct World {
    server: TestServer,
    store: Arc<SessionStore>,
    bridge: Arc<RecordingBridge>,
    _dir: tempfile::TempDir,
}

async fn make_world() -> World {
    let settings = Settings::default();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_in_memory().await.unwrap();
    let store = Arc::new(
        SessionStore::open(SessionRepository::new(db), dir.path().join("sessions"))
            .await
            .unwrap(),
    );
    let events = Arc::new(ApiRunnerEvents::new(
        Arc::clone(&store),
        Duration::from_secs(settings.permission_timeout_s),
    ));
    let registry = Arc::new(RunnerRegistry::new(Arc::clone(&store), events, &settings));
    let bridges = Arc::new(BridgeManager::new());
    let bridge = Arc::new(RecordingBridge::default());
    bridges.register_bridge("telegram", bridge.clone());
    let subscriber = Arc::new(BridgeSubscriber::new(
        Arc::clone(&store),
        Arc::clone(&bridges),
    ));
    let state = AppState::new(store.clone(), registry, bridges, subscriber, settings);
    World {
        server: TestServer::new(create_router(state)).unwrap(),
        store,
        bridge,
        _dir: dir,
    }
}

async fn create_external_session(world: &World) -> String {
    let response = world
        .server
        .post("/api/external/sessions")
        .json(&json!({
            "agent_metadata": {"name": "crawler", "type": "scraper", "workspace": "/srv/crawl"},
            "session_name": "Crawl docs",
            "platform": "telegram",
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let body: Value = response.json();
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn external_create_binds_platform_thread() {
    let world = make_world().await;
    let session_id = create_external_session(&world).await;

    let session = world.store.get_session(&session_id).unwrap();
    assert_eq!(session.platform.as_deref(), Some("telegram"));
    assert_eq!(
        session.platform_thread_id.as_deref(),
        Some(format!("topic_{session_id}").as_str())
    );
    assert_eq!(session.external_agent_name.as_deref(), Some("crawler"));
    assert_eq!(session.name.as_deref(), Some("Crawl docs"));

    let threads = world.bridge.threads.lock().unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].1, "Crawl docs");
}

#[tokio::test]
async fn external_create_without_bridge_is_rejected_and_cleaned() {
    let world = make_world().await;
    let response = world
        .server
        .post("/api/external/sessions")
        .json(&json!({
            "agent_metadata": {"name": "crawler", "type": "scraper"},
            "session_name": "Nowhere",
            "platform": "discord",
        }))
        .await;
    response.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);

    // The orphan cleanup is async; give it a beat.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        world
            .store
            .list_sessions()
            .iter()
            .all(|s| s.name.as_deref() != Some("Nowhere"))
    );
}

#[tokio::test]
async fn agent_events_route_to_bridge() {
    let world = make_world().await;
    let session_id = create_external_session(&world).await;

    world
        .server
        .post(&format!("/api/external/sessions/{session_id}/events"))
        .json(&json!({"type": "output", "data": {"text": "Scraped 10 pages"}}))
        .await
        .assert_status_ok();
    world
        .server
        .post(&format!("/api/external/sessions/{session_id}/events"))
        .json(&json!({"type": "status", "data": {"status": "done"}}))
        .await
        .assert_status_ok();
    world
        .server
        .post(&format!("/api/external/sessions/{session_id}/events"))
        .json(&json!({
            "type": "approval_request",
            "data": {"request": {
                "request_id": "req_9",
                "title": "Fetch",
                "description": "GET https://example.com",
                "options": ["Allow", "Deny"],
            }}
        }))
        .await
        .assert_status_ok();

    assert_eq!(
        world.bridge.outputs.lock().unwrap().as_slice(),
        [(session_id.clone(), "Scraped 10 pages".to_string())]
    );
    assert_eq!(
        world.bridge.statuses.lock().unwrap().as_slice(),
        [(session_id.clone(), "done".to_string())]
    );
    let approvals = world.bridge.approvals.lock().unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].1.request_id, "req_9");

    let response = world
        .server
        .post(&format!("/api/external/sessions/{session_id}/events"))
        .json(&json!({"type": "telepathy", "data": {}}))
        .await;
    response.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn approval_response_resolves_and_is_pollable() {
    let world = make_world().await;
    let session_id = create_external_session(&world).await;

    let rx = world
        .store
        .add_pending_permission(&session_id, "req_1", "Fetch", json!({}));

    world
        .server
        .post(&format!(
            "/api/external/sessions/{session_id}/approvals/req_1/respond"
        ))
        .json(&json!({"option_selected": "Allow", "username": "alice"}))
        .await
        .assert_status_ok();

    let result = rx.await.unwrap();
    assert!(result.allowed);
    assert_eq!(result.resolved_by.as_deref(), Some("alice"));

    // Second respond hits the already-resolved path.
    let response = world
        .server
        .post(&format!(
            "/api/external/sessions/{session_id}/approvals/req_1/respond"
        ))
        .json(&json!({"option_selected": "Deny"}))
        .await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);

    // The agent can poll the approval response back.
    let body: Value = world
        .server
        .get(&format!("/api/external/sessions/{session_id}/events"))
        .await
        .json();
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "approval_response");
    assert_eq!(events[0]["data"]["option_selected"], "Allow");
}
