//! Session registry, event log fan-out, and runtime process state.
//!
//! The store is the leaf of the system: runners, bridges, and the HTTP API
//! all talk to it, and it calls nothing back. Durable state (sessions,
//! messages) lives in SQLite; the event log is JSONL per session; everything
//! else is in-memory runtime bookkeeping.

pub mod event_log;
pub mod repository;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

use minder_protocol::{EventEnvelope, EventType, PermissionResult, SessionState};

use crate::fsutil::{has_git_repository, normalize_directory_path};
use crate::session::models::{Message, Session};
use crate::session::{now_ts, state::parse_ts};

pub use event_log::SessionUsage;
pub use repository::SessionRepository;

/// Depth of the per-session output dedup ring.
const DEDUP_RING_LEN: usize = 10;

static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ansi regex"));

/// A registered live subscriber queue.
struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

/// A registered, unresolved permission request.
pub struct PendingPermission {
    pub kind: String,
    pub payload: Value,
    pub created_at: String,
    tx: oneshot::Sender<PermissionResult>,
}

/// Snapshot of a pending permission for read access.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PendingPermissionInfo {
    pub request_id: String,
    pub kind: String,
    pub payload: Value,
    pub created_at: String,
}

/// Session registry with SQLite persistence and per-session runtime state.
pub struct SessionStore {
    repo: SessionRepository,
    sessions_dir: PathBuf,
    sessions: DashMap<String, Session>,
    /// Sequence counters; also the critical section around log appends so
    /// subscribers never observe a gap between numbering and durability.
    emit_state: Mutex<HashMap<String, u64>>,
    subscribers: DashMap<String, Vec<Subscriber>>,
    subscriber_ids: AtomicU64,
    pending_permissions: DashMap<(String, String), PendingPermission>,
    recent_output: DashMap<String, VecDeque<String>>,
    pending_inputs: DashMap<String, Vec<String>>,
    stop_requested: DashMap<String, ()>,
}

impl SessionStore {
    /// Open the store, loading persisted sessions and resuming sequence
    /// counters from the tail of each event log.
    pub async fn open(repo: SessionRepository, sessions_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&sessions_dir)
            .with_context(|| format!("creating sessions directory: {}", sessions_dir.display()))?;

        let store = Self {
            repo,
            sessions_dir,
            sessions: DashMap::new(),
            emit_state: Mutex::new(HashMap::new()),
            subscribers: DashMap::new(),
            subscriber_ids: AtomicU64::new(1),
            pending_permissions: DashMap::new(),
            recent_output: DashMap::new(),
            pending_inputs: DashMap::new(),
            stop_requested: DashMap::new(),
        };

        let sessions = store.repo.load_sessions().await?;
        let mut counters = store.emit_state.lock().expect("emit lock");
        for session in sessions {
            counters.insert(
                session.id.clone(),
                event_log::last_seq(&store.sessions_dir, &session.id),
            );
            store.sessions.insert(session.id.clone(), session);
        }
        drop(counters);

        info!(count = store.sessions.len(), "Loaded sessions from database");
        Ok(store)
    }

    pub fn repository(&self) -> &SessionRepository {
        &self.repo
    }

    pub fn sessions_dir(&self) -> &PathBuf {
        &self.sessions_dir
    }

    // ========== Session registry ==========

    /// Create and register a new session in CREATED state.
    pub async fn create_session(
        &self,
        repo_id: &str,
        base_ref: Option<String>,
    ) -> Result<Session> {
        let id = format!("sess_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let session = Session::new(id.clone(), repo_id.to_string(), base_ref, now_ts());
        self.repo.upsert_session(&session).await?;
        self.sessions.insert(id.clone(), session.clone());
        self.emit_state.lock().expect("emit lock").insert(id, 0);
        Ok(session)
    }

    /// All sessions currently tracked in memory.
    pub fn list_sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    /// Persist an updated session snapshot.
    pub async fn update_session(&self, session: Session) -> Result<()> {
        self.repo.upsert_session(&session).await?;
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Remove a session and all of its runtime state, logs, and messages.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return Ok(false);
        };
        self.repo.delete_session(session_id).await?;
        self.emit_state.lock().expect("emit lock").remove(session_id);
        self.subscribers.remove(session_id);
        self.pending_permissions
            .retain(|(sid, _), _| sid != session_id);
        self.recent_output.remove(session_id);
        self.pending_inputs.remove(session_id);
        self.stop_requested.remove(session_id);
        if session.workdir_managed
            && let Some(dir) = &session.directory
        {
            let _ = std::fs::remove_dir_all(dir);
        }
        event_log::remove_session_logs(&self.sessions_dir, session_id);
        info!(session_id, "Session deleted");
        Ok(true)
    }

    // ========== Event log and fan-out ==========

    /// Advance and return the per-session event sequence counter.
    pub fn next_seq(&self, session_id: &str) -> u64 {
        let mut counters = self.emit_state.lock().expect("emit lock");
        let counter = counters.entry(session_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Register a new subscriber queue for a session.
    ///
    /// Returns the subscriber id (for removal) and the receiving end.
    pub fn new_subscriber(
        &self,
        session_id: &str,
    ) -> (u64, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscriber_ids.fetch_add(1, Ordering::Relaxed);
        let mut queues = self.subscribers.entry(session_id.to_string()).or_default();
        queues.push(Subscriber { id, tx });
        debug!(
            session_id,
            subscriber_id = id,
            total = queues.len(),
            "New event subscriber"
        );
        (id, rx)
    }

    /// Unregister a subscriber queue.
    pub fn remove_subscriber(&self, session_id: &str, subscriber_id: u64) {
        if let Some(mut queues) = self.subscribers.get_mut(session_id) {
            queues.retain(|s| s.id != subscriber_id);
        }
        self.subscribers
            .retain(|_, queues| !queues.is_empty());
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .get(session_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Append an event to the persistent log and deliver it to every live
    /// subscriber, in sequence order.
    ///
    /// Sequence assignment and the durable append share one critical
    /// section; delivery is non-blocking and drops closed queues.
    pub fn emit(
        &self,
        session_id: &str,
        event_type: EventType,
        data: Value,
    ) -> Result<EventEnvelope> {
        let event = {
            let mut counters = self.emit_state.lock().expect("emit lock");
            let counter = counters.entry(session_id.to_string()).or_insert(0);
            *counter += 1;
            let event = EventEnvelope {
                session_id: session_id.to_string(),
                seq: *counter,
                ts: now_ts(),
                event_type,
                data,
            };
            event_log::append_event(&self.sessions_dir, &event)?;
            event
        };

        if let Some(mut queues) = self.subscribers.get_mut(session_id) {
            queues.retain(|subscriber| subscriber.tx.send(event.clone()).is_ok());
        }
        Ok(event)
    }

    /// Emit a `session_state` event for the session's current state.
    pub fn emit_state(&self, session: &Session) -> Result<EventEnvelope> {
        self.emit(
            &session.id,
            EventType::SessionState,
            serde_json::json!({ "state": session.state }),
        )
    }

    /// Replay persisted events with `seq > since_seq`.
    pub fn read_event_log(
        &self,
        session_id: &str,
        since_seq: u64,
        limit: Option<usize>,
    ) -> Vec<EventEnvelope> {
        event_log::read_events(&self.sessions_dir, session_id, since_seq, limit)
    }

    /// Aggregate token and cost usage over the session's event log.
    pub fn session_usage(&self, session_id: &str) -> SessionUsage {
        event_log::session_usage(&self.sessions_dir, session_id)
    }

    // ========== Pending permissions ==========

    /// Register a permission request awaiting human resolution.
    ///
    /// Returns the future the runner awaits. Re-registering the same
    /// request id replaces the old entry (its awaiter sees a closed
    /// channel).
    pub fn add_pending_permission(
        &self,
        session_id: &str,
        request_id: &str,
        kind: &str,
        payload: Value,
    ) -> oneshot::Receiver<PermissionResult> {
        let (tx, rx) = oneshot::channel();
        self.pending_permissions.insert(
            (session_id.to_string(), request_id.to_string()),
            PendingPermission {
                kind: kind.to_string(),
                payload,
                created_at: now_ts(),
                tx,
            },
        );
        rx
    }

    /// Resolve a pending permission. First writer wins.
    ///
    /// Returns false when the request is unknown or already resolved; the
    /// stored result is never overwritten.
    pub fn resolve_pending_permission(
        &self,
        session_id: &str,
        request_id: &str,
        result: PermissionResult,
    ) -> bool {
        let Some((_, pending)) = self
            .pending_permissions
            .remove(&(session_id.to_string(), request_id.to_string()))
        else {
            return false;
        };
        // The awaiter may have gone away (runner stopped); resolution still
        // counts so later writers observe "already resolved".
        let _ = pending.tx.send(result);
        true
    }

    pub fn get_pending_permission(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Option<PendingPermissionInfo> {
        self.pending_permissions
            .get(&(session_id.to_string(), request_id.to_string()))
            .map(|entry| PendingPermissionInfo {
                request_id: request_id.to_string(),
                kind: entry.kind.clone(),
                payload: entry.payload.clone(),
                created_at: entry.created_at.clone(),
            })
    }

    /// Most recently registered unresolved permission for a session.
    pub fn latest_pending_permission(&self, session_id: &str) -> Option<PendingPermissionInfo> {
        self.pending_permissions
            .iter()
            .filter(|entry| entry.key().0 == session_id)
            .max_by(|a, b| a.value().created_at.cmp(&b.value().created_at))
            .map(|entry| PendingPermissionInfo {
                request_id: entry.key().1.clone(),
                kind: entry.value().kind.clone(),
                payload: entry.value().payload.clone(),
                created_at: entry.value().created_at.clone(),
            })
    }

    // ========== Message history ==========

    pub async fn add_message(
        &self,
        session_id: &str,
        role: &str,
        content: &Value,
    ) -> Result<Message> {
        self.repo.add_message(session_id, role, content).await
    }

    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.repo.get_messages(session_id).await
    }

    pub async fn get_message_count(&self, session_id: &str) -> Result<i64> {
        self.repo.get_message_count(session_id).await
    }

    pub async fn clear_messages(&self, session_id: &str) -> Result<()> {
        self.repo.clear_messages(session_id).await
    }

    // ========== Runner session ids ==========

    /// Store the runner-assigned session id. Set-once: later attempts are
    /// ignored until the start path clears it explicitly.
    pub async fn set_runner_session_id(&self, session_id: &str, runner_session_id: &str) -> Result<()> {
        let Some(mut session) = self.get_session(session_id) else {
            return Ok(());
        };
        if session.runner_session_id.is_some() {
            debug!(session_id, "Runner session id already set; ignoring overwrite");
            return Ok(());
        }
        session.runner_session_id = Some(runner_session_id.to_string());
        self.update_session(session).await
    }

    pub fn get_runner_session_id(&self, session_id: &str) -> Option<String> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.runner_session_id.clone())
    }

    pub async fn clear_runner_session_id(&self, session_id: &str) -> Result<()> {
        let Some(mut session) = self.get_session(session_id) else {
            return Ok(());
        };
        session.runner_session_id = None;
        self.update_session(session).await
    }

    /// Find the session attached to a given runner session id.
    pub fn find_session_by_runner_session_id(&self, runner_session_id: &str) -> Option<String> {
        self.sessions
            .iter()
            .find(|entry| entry.value().runner_session_id.as_deref() == Some(runner_session_id))
            .map(|entry| entry.key().clone())
    }

    // ========== Working directories ==========

    /// Record a working directory and refresh its git probe.
    pub async fn set_workdir(&self, session_id: &str, path: &str, managed: bool) -> Result<String> {
        let normalized = normalize_directory_path(path);
        if let Some(mut session) = self.get_session(session_id) {
            session.directory = Some(normalized.clone());
            session.directory_has_git = has_git_repository(&normalized);
            session.workdir_managed = managed;
            self.update_session(session).await?;
        }
        Ok(normalized)
    }

    /// Create a managed temporary working directory for the session.
    pub async fn create_workdir(&self, session_id: &str) -> Result<String> {
        let path = std::env::temp_dir().join(format!(
            "minder_{}_{:08x}",
            session_id,
            rand::random::<u32>()
        ));
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating workdir: {}", path.display()))?;
        self.set_workdir(session_id, &path.to_string_lossy(), true)
            .await
    }

    pub fn get_workdir(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).and_then(|s| s.directory.clone())
    }

    /// Clear the working directory, removing it from disk when managed.
    ///
    /// With `force = false`, unmanaged directories keep their binding.
    pub async fn clear_workdir(&self, session_id: &str, force: bool) -> Result<()> {
        let Some(mut session) = self.get_session(session_id) else {
            return Ok(());
        };
        if !force && !session.workdir_managed {
            return Ok(());
        }
        if session.workdir_managed
            && let Some(dir) = &session.directory
        {
            let _ = std::fs::remove_dir_all(dir);
        }
        session.directory = None;
        session.directory_has_git = false;
        session.workdir_managed = false;
        self.update_session(session).await
    }

    // ========== Output dedup ==========

    /// True if the normalized text is non-empty and not recently emitted.
    ///
    /// A true result records the text in the ring.
    pub fn should_emit_output(&self, session_id: &str, text: &str) -> bool {
        let normalized = normalize_output(text);
        if normalized.is_empty() {
            return false;
        }
        let mut history = self
            .recent_output
            .entry(session_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(DEDUP_RING_LEN));
        if history.contains(&normalized) {
            return false;
        }
        if history.len() == DEDUP_RING_LEN {
            history.pop_front();
        }
        history.push_back(normalized);
        true
    }

    pub fn clear_last_output(&self, session_id: &str) {
        self.recent_output.remove(session_id);
    }

    pub fn get_recent_output(&self, session_id: &str) -> Vec<String> {
        self.recent_output
            .get(session_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ========== Pending inputs ==========

    /// Queue input to deliver once the runner is between turns.
    pub fn add_pending_input(&self, session_id: &str, text: &str) {
        self.pending_inputs
            .entry(session_id.to_string())
            .or_default()
            .push(text.to_string());
    }

    /// Pop the next queued input, if any.
    pub fn pop_next_pending_input(&self, session_id: &str) -> Option<String> {
        let mut queue = self.pending_inputs.get_mut(session_id)?;
        if queue.is_empty() {
            return None;
        }
        Some(queue.remove(0))
    }

    pub fn has_pending_inputs(&self, session_id: &str) -> bool {
        self.pending_inputs
            .get(session_id)
            .map(|q| !q.is_empty())
            .unwrap_or(false)
    }

    pub fn clear_pending_inputs(&self, session_id: &str) {
        self.pending_inputs.remove(session_id);
    }

    // ========== Stop requests ==========

    /// Signal a runner's streaming task to wind down cooperatively.
    pub fn request_stop(&self, session_id: &str) {
        self.stop_requested.insert(session_id.to_string(), ());
    }

    pub fn is_stop_requested(&self, session_id: &str) -> bool {
        self.stop_requested.contains_key(session_id)
    }

    pub fn clear_stop_requested(&self, session_id: &str) {
        self.stop_requested.remove(session_id);
    }

    // ========== Retention ==========

    /// Delete sessions (and logs) older than the retention window.
    ///
    /// Sessions still working a turn are skipped regardless of age.
    pub async fn prune_sessions(&self, retention_days: i64) -> Result<usize> {
        if retention_days <= 0 {
            return Ok(0);
        }
        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
        let mut removed = 0;
        for session in self.list_sessions() {
            if session.state.is_active() {
                continue;
            }
            let stamp = session
                .ended_at
                .as_deref()
                .unwrap_or(session.last_activity_at.as_str());
            let Some(when) = parse_ts(stamp) else {
                continue;
            };
            if when < cutoff && self.delete_session(&session.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(count = removed, "Pruned expired sessions");
        }
        Ok(removed)
    }
}

/// Strip ANSI codes and collapse whitespace for stable comparisons.
fn normalize_output(text: &str) -> String {
    let stripped = ANSI_RE.replace_all(text, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
