//! Persistent session↔thread bindings for a bridge.
//!
//! Bridges survive restarts by writing their thread map to a small JSON
//! document under the data dir (e.g. `bridge_threads.json`). Lookups work
//! in both directions: routing output needs session→thread, incoming chat
//! messages need thread→session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ThreadStateDoc {
    /// session_id -> platform thread id
    threads: HashMap<String, String>,
}

pub struct ThreadStateManager {
    path: PathBuf,
    doc: Mutex<ThreadStateDoc>,
}

impl ThreadStateManager {
    /// Open the state file, tolerating absence and damage.
    pub fn open(path: &Path) -> Self {
        let doc = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "Bridge state file damaged; starting fresh");
                ThreadStateDoc::default()
            }),
            Err(_) => ThreadStateDoc::default(),
        };
        Self {
            path: path.to_path_buf(),
            doc: Mutex::new(doc),
        }
    }

    fn save_locked(&self, doc: &ThreadStateDoc) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating bridge state directory: {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(doc).context("encoding bridge state")?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("writing bridge state: {}", self.path.display()))?;
        Ok(())
    }

    /// Bind a session to a platform thread and persist.
    pub fn bind(&self, session_id: &str, thread_id: &str) -> Result<()> {
        let mut doc = self.doc.lock().unwrap();
        doc.threads
            .insert(session_id.to_string(), thread_id.to_string());
        self.save_locked(&doc)
    }

    /// Remove a session's binding and persist.
    pub fn unbind(&self, session_id: &str) -> Result<()> {
        let mut doc = self.doc.lock().unwrap();
        if doc.threads.remove(session_id).is_some() {
            self.save_locked(&doc)?;
        }
        Ok(())
    }

    pub fn thread_for_session(&self, session_id: &str) -> Option<String> {
        self.doc.lock().unwrap().threads.get(session_id).cloned()
    }

    pub fn session_for_thread(&self, thread_id: &str) -> Option<String> {
        self.doc
            .lock()
            .unwrap()
            .threads
            .iter()
            .find(|(_, tid)| tid.as_str() == thread_id)
            .map(|(sid, _)| sid.clone())
    }

    pub fn bindings(&self) -> Vec<(String, String)> {
        self.doc
            .lock()
            .unwrap()
            .threads
            .iter()
            .map(|(s, t)| (s.clone(), t.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge_threads.json");

        let state = ThreadStateManager::open(&path);
        state.bind("sess_1", "topic_42").unwrap();
        state.bind("sess_2", "topic_43").unwrap();

        let reopened = ThreadStateManager::open(&path);
        assert_eq!(reopened.thread_for_session("sess_1").as_deref(), Some("topic_42"));
        assert_eq!(reopened.session_for_thread("topic_43").as_deref(), Some("sess_2"));
    }

    #[test]
    fn unbind_removes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge_threads.json");
        let state = ThreadStateManager::open(&path);
        state.bind("sess_1", "topic_42").unwrap();
        state.unbind("sess_1").unwrap();

        let reopened = ThreadStateManager::open(&path);
        assert!(reopened.thread_for_session("sess_1").is_none());
    }

    #[test]
    fn damaged_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge_threads.json");
        std::fs::write(&path, "{{{ not json").unwrap();
        let state = ThreadStateManager::open(&path);
        assert!(state.bindings().is_empty());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = ThreadStateManager::open(&dir.path().join("never_written.json"));
        assert!(state.thread_for_session("sess_1").is_none());
    }
}
