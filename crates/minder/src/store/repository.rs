//! SQLite persistence for session and message records.

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::db::Database;
use crate::session::models::{Message, Session, SessionRow};
use crate::session::now_ts;

/// Repository for session database operations.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    db: Database,
}

impl SessionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert or replace a session snapshot.
    pub async fn upsert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sessions (
                id, repo_id, repo_display, base_ref, state, name,
                created_at, started_at, ended_at, last_activity_at, exit_code,
                runner_header, runner_session_id, adapter,
                directory, directory_has_git, workdir_managed,
                external_agent_id, external_agent_name, external_agent_type,
                external_agent_icon, external_agent_workspace,
                platform, platform_thread_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.repo_id)
        .bind(&session.repo_display)
        .bind(&session.base_ref)
        .bind(session.state.as_str())
        .bind(&session.name)
        .bind(&session.created_at)
        .bind(&session.started_at)
        .bind(&session.ended_at)
        .bind(&session.last_activity_at)
        .bind(session.exit_code)
        .bind(&session.runner_header)
        .bind(&session.runner_session_id)
        .bind(&session.adapter)
        .bind(&session.directory)
        .bind(session.directory_has_git)
        .bind(session.workdir_managed)
        .bind(&session.external_agent_id)
        .bind(&session.external_agent_name)
        .bind(&session.external_agent_type)
        .bind(&session.external_agent_icon)
        .bind(&session.external_agent_workspace)
        .bind(&session.platform)
        .bind(&session.platform_thread_id)
        .execute(self.db.pool())
        .await
        .context("persisting session")?;
        Ok(())
    }

    /// Load every persisted session.
    pub async fn load_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions")
            .fetch_all(self.db.pool())
            .await
            .context("loading sessions")?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    /// Delete a session and its messages.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id)
            .execute(self.db.pool())
            .await
            .context("deleting session messages")?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(self.db.pool())
            .await
            .context("deleting session")?;
        Ok(())
    }

    /// Append a message to the session transcript.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: &str,
        content: &serde_json::Value,
    ) -> Result<Message> {
        let message = Message {
            id: format!("msg_{}", &Uuid::new_v4().simple().to_string()[..12]),
            session_id: session_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            seq: 0,
            created_at: now_ts(),
        };
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (id, session_id, role, content, seq, created_at)
            VALUES (?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?), ?)
            RETURNING seq
            "#,
        )
        .bind(&message.id)
        .bind(session_id)
        .bind(role)
        .bind(&message.content)
        .bind(session_id)
        .bind(&message.created_at)
        .fetch_one(self.db.pool())
        .await
        .context("inserting message")?;
        Ok(Message { seq, ..message })
    }

    /// Fetch the transcript in order.
    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        sqlx::query_as::<_, Message>(
            "SELECT id, session_id, role, content, seq, created_at FROM messages WHERE session_id = ? ORDER BY seq",
        )
        .bind(session_id)
        .fetch_all(self.db.pool())
        .await
        .context("fetching messages")
    }

    pub async fn get_message_count(&self, session_id: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(self.db.pool())
            .await
            .context("counting messages")
    }

    pub async fn clear_messages(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id)
            .execute(self.db.pool())
            .await
            .context("clearing messages")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minder_protocol::SessionState;
    use serde_json::json;

    async fn make_repo() -> SessionRepository {
        SessionRepository::new(Database::open_in_memory().await.unwrap())
    }

    fn make_session(id: &str) -> Session {
        Session::new(id.into(), "repo_x".into(), None, now_ts())
    }

    #[tokio::test]
    async fn upsert_and_load_round_trip() {
        let repo = make_repo().await;
        let mut session = make_session("sess_1");
        session.state = SessionState::Running;
        session.name = Some("first prompt".into());
        session.platform = Some("telegram".into());
        repo.upsert_session(&session).await.unwrap();

        let loaded = repo.load_sessions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "sess_1");
        assert_eq!(loaded[0].state, SessionState::Running);
        assert_eq!(loaded[0].platform.as_deref(), Some("telegram"));
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let repo = make_repo().await;
        let mut session = make_session("sess_1");
        repo.upsert_session(&session).await.unwrap();
        session.name = Some("renamed".into());
        repo.upsert_session(&session).await.unwrap();

        let loaded = repo.load_sessions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name.as_deref(), Some("renamed"));
    }

    #[tokio::test]
    async fn messages_get_dense_sequence_numbers() {
        let repo = make_repo().await;
        repo.upsert_session(&make_session("sess_1")).await.unwrap();

        let m1 = repo
            .add_message("sess_1", "user", &json!([{"type": "text", "text": "hi"}]))
            .await
            .unwrap();
        let m2 = repo
            .add_message("sess_1", "assistant", &json!([{"type": "text", "text": "hello"}]))
            .await
            .unwrap();
        assert_eq!(m1.seq, 1);
        assert_eq!(m2.seq, 2);

        let messages = repo.get_messages("sess_1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(repo.get_message_count("sess_1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_session_removes_messages() {
        let repo = make_repo().await;
        repo.upsert_session(&make_session("sess_1")).await.unwrap();
        repo.add_message("sess_1", "user", &json!([])).await.unwrap();

        repo.delete_session("sess_1").await.unwrap();
        assert!(repo.load_sessions().await.unwrap().is_empty());
        assert_eq!(repo.get_message_count("sess_1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_messages_keeps_session() {
        let repo = make_repo().await;
        repo.upsert_session(&make_session("sess_1")).await.unwrap();
        repo.add_message("sess_1", "user", &json!([])).await.unwrap();
        repo.clear_messages("sess_1").await.unwrap();
        assert_eq!(repo.get_message_count("sess_1").await.unwrap(), 0);
        assert_eq!(repo.load_sessions().await.unwrap().len(), 1);
    }
}
