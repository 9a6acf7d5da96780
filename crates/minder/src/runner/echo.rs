//! Development runner that echoes the conversation back.
//!
//! The echo adapter drives the full event contract without any external
//! backend: header, step output, final output, an accumulated blob,
//! token/cost metadata, heartbeats, and the hand-back to AWAITING_INPUT.
//! Follow-up turns answer with the accumulated transcript, which makes it
//! useful for exercising multi-turn flows in tests and demos.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::info;

use crate::store::SessionStore;

use super::{Runner, RunnerEvents};

const HEADER_TITLE: &str = "Echo Runner 1.2";

pub struct EchoRunner {
    store: Arc<SessionStore>,
    events: Arc<dyn RunnerEvents>,
    transcripts: DashMap<String, Vec<String>>,
    turns: DashMap<String, JoinHandle<()>>,
    modes: DashMap<String, String>,
}

impl EchoRunner {
    pub fn new(store: Arc<SessionStore>, events: Arc<dyn RunnerEvents>) -> Self {
        Self {
            store,
            events,
            transcripts: DashMap::new(),
            turns: DashMap::new(),
            modes: DashMap::new(),
        }
    }

    fn spawn_turn(&self, session_id: &str, text: String, first_turn: bool) {
        let store = Arc::clone(&self.store);
        let events = Arc::clone(&self.events);
        let key = session_id.to_string();
        let session_id = session_id.to_string();

        self.transcripts
            .entry(session_id.clone())
            .or_default()
            .push(text.clone());
        let transcript = self
            .transcripts
            .get(&session_id)
            .map(|t| t.clone())
            .unwrap_or_default();

        let handle = tokio::spawn(async move {
            let started = std::time::Instant::now();
            if first_turn {
                events
                    .on_header(
                        &session_id,
                        Some(HEADER_TITLE),
                        Some(&format!("echo-{session_id}")),
                        Some("echo-1"),
                        Some("local"),
                    )
                    .await;
            }

            events
                .on_output(&session_id, "combined", "[echo] composing reply\n", Some("step"), false)
                .await;
            events
                .on_heartbeat(&session_id, started.elapsed().as_secs_f64(), false)
                .await;

            if store.is_stop_requested(&session_id) {
                events.on_exit(&session_id, Some(0)).await;
                return;
            }

            let reply = if first_turn {
                format!("Echo: {text}")
            } else {
                format!("Recall: {}", transcript.join(" / "))
            };
            let _ = store
                .add_message(&session_id, "user", &json!([{"type": "text", "text": text}]))
                .await;
            let _ = store
                .add_message(&session_id, "assistant", &json!([{"type": "text", "text": reply}]))
                .await;

            events
                .on_output(&session_id, "combined", &reply, Some("final"), true)
                .await;
            events
                .on_output(&session_id, "combined", &reply, Some("output_final"), true)
                .await;

            let words = text.split_whitespace().count() as u64;
            events
                .on_metadata(
                    &session_id,
                    "tokens",
                    json!({"input": words, "output": words + 2}),
                    &format!("input: {words}, output: {}", words + 2),
                )
                .await;
            events
                .on_metadata(&session_id, "cost", json!(0.0001), "$0.0001")
                .await;

            events
                .on_heartbeat(&session_id, started.elapsed().as_secs_f64(), true)
                .await;
            events.on_awaiting_input(&session_id).await;
        });
        self.turns.insert(key, handle);
    }
}

#[async_trait]
impl Runner for EchoRunner {
    async fn start(&self, session_id: &str, prompt: &str, approval_choice: u8) -> Result<()> {
        info!(session_id, approval_choice, "Starting echo session");
        self.store.clear_stop_requested(session_id);
        self.transcripts.remove(session_id);
        self.spawn_turn(session_id, prompt.to_string(), true);
        Ok(())
    }

    async fn send_input(&self, session_id: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        // Echo turns are short; let a streaming turn finish before the
        // follow-up so replies never interleave.
        if let Some((_, turn)) = self.turns.remove(session_id) {
            let _ = turn.await;
        }
        self.store.clear_stop_requested(session_id);
        self.spawn_turn(session_id, text.to_string(), false);
        Ok(())
    }

    async fn stop(&self, session_id: &str) -> Result<Option<i32>> {
        self.store.request_stop(session_id);
        if let Some((_, handle)) = self.turns.remove(session_id) {
            handle.abort();
            let _ = handle.await;
        }
        self.store.clear_stop_requested(session_id);
        self.transcripts.remove(session_id);
        Ok(Some(0))
    }

    async fn update_permission_mode(&self, session_id: &str, mode: &str) -> Result<()> {
        self.modes.insert(session_id.to_string(), mode.to_string());
        Ok(())
    }

    fn runner_type(&self) -> &'static str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::runner::ApiRunnerEvents;
    use crate::session::transition;
    use crate::store::SessionRepository;
    use minder_protocol::{EventType, SessionState};
    use std::time::Duration;

    async fn make_runner() -> (Arc<SessionStore>, EchoRunner, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = SessionRepository::new(Database::open_in_memory().await.unwrap());
        let store = Arc::new(
            SessionStore::open(repo, dir.path().join("sessions"))
                .await
                .unwrap(),
        );
        let events = Arc::new(ApiRunnerEvents::new(
            Arc::clone(&store),
            Duration::from_secs(300),
        ));
        let runner = EchoRunner::new(Arc::clone(&store), events);
        (store, runner, dir)
    }

    async fn running_session(store: &SessionStore) -> String {
        let mut session = store.create_session("repo_x", None).await.unwrap();
        transition(&mut session, SessionState::Running);
        let id = session.id.clone();
        store.update_session(session).await.unwrap();
        id
    }

    async fn wait_for_awaiting(store: &SessionStore, id: &str) {
        for _ in 0..100 {
            if store.get_session(id).unwrap().state == SessionState::AwaitingInput {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached AWAITING_INPUT");
    }

    #[tokio::test]
    async fn start_produces_header_output_and_metadata() {
        let (store, runner, _dir) = make_runner().await;
        let id = running_session(&store).await;

        runner.start(&id, "hello there", 1).await.unwrap();
        wait_for_awaiting(&store, &id).await;

        let log = store.read_event_log(&id, 0, None);
        let types: Vec<EventType> = log.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&EventType::Output));
        assert!(types.contains(&EventType::OutputFinal));
        assert!(types.contains(&EventType::Metadata));
        assert!(types.contains(&EventType::Heartbeat));
        assert!(types.contains(&EventType::SessionState));

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.runner_header.as_deref(), Some(HEADER_TITLE));
        assert_eq!(
            store.get_runner_session_id(&id).as_deref(),
            Some(format!("echo-{id}").as_str())
        );

        let finals: Vec<_> = log
            .iter()
            .filter(|e| e.event_type == EventType::Output && e.is_final())
            .collect();
        assert!(finals.iter().any(|e| e.text() == Some("Echo: hello there")));
    }

    #[tokio::test]
    async fn follow_up_recalls_earlier_turns() {
        let (store, runner, _dir) = make_runner().await;
        let id = running_session(&store).await;

        runner.start(&id, "Remember 888. Reply OK.", 1).await.unwrap();
        wait_for_awaiting(&store, &id).await;

        let mut session = store.get_session(&id).unwrap();
        transition(&mut session, SessionState::Running);
        store.update_session(session).await.unwrap();

        runner.send_input(&id, "What number?").await.unwrap();
        wait_for_awaiting(&store, &id).await;

        let log = store.read_event_log(&id, 0, None);
        let replies: Vec<&str> = log
            .iter()
            .filter(|e| e.event_type == EventType::Output && e.is_final())
            .filter_map(|e| e.text())
            .collect();
        assert!(
            replies.iter().any(|t| t.contains("888")),
            "follow-up should recall 888, got {replies:?}"
        );
        assert_eq!(store.get_message_count(&id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (store, runner, _dir) = make_runner().await;
        let id = running_session(&store).await;
        runner.start(&id, "hi", 1).await.unwrap();
        assert_eq!(runner.stop(&id).await.unwrap(), Some(0));
        assert_eq!(runner.stop(&id).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn input_waits_for_streaming_turn() {
        let (store, runner, _dir) = make_runner().await;
        let id = running_session(&store).await;
        runner.start(&id, "first", 1).await.unwrap();
        // Immediately push input; the first turn may still be streaming.
        runner.send_input(&id, "second").await.unwrap();

        for _ in 0..100 {
            let finals: Vec<String> = store
                .read_event_log(&id, 0, None)
                .iter()
                .filter(|e| e.event_type == EventType::Output && e.is_final())
                .filter_map(|e| e.text().map(str::to_string))
                .collect();
            if finals.iter().any(|t| t.contains("first"))
                && finals.iter().any(|t| t.contains("second"))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("both turns should produce final output");
    }
}
