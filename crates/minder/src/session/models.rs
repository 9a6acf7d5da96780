//! Session and message records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use minder_protocol::SessionState;

/// Server-side session metadata exposed over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub repo_id: String,
    pub repo_display: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,
    pub state: SessionState,
    #[serde(default)]
    pub name: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
    pub last_activity_at: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Greeting/model banner reported by the runner.
    #[serde(default)]
    pub runner_header: Option<String>,
    /// Runner-assigned external session id, used for resume.
    #[serde(default)]
    pub runner_session_id: Option<String>,
    /// Runner adapter name. `None` selects the default adapter.
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub directory_has_git: bool,
    /// Managed directories were created by us and are removed on delete.
    #[serde(default)]
    pub workdir_managed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_agent_icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_agent_workspace: Option<String>,
    /// Chat platform this session is bound to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_thread_id: Option<String>,
}

impl Session {
    /// Build a fresh session in `CREATED` state.
    pub fn new(id: String, repo_id: String, base_ref: Option<String>, now: String) -> Self {
        Self {
            id,
            repo_display: repo_id.clone(),
            repo_id,
            base_ref,
            state: SessionState::Created,
            name: None,
            created_at: now.clone(),
            started_at: None,
            ended_at: None,
            last_activity_at: now,
            exit_code: None,
            runner_header: None,
            runner_session_id: None,
            adapter: None,
            directory: None,
            directory_has_git: false,
            workdir_managed: false,
            external_agent_id: None,
            external_agent_name: None,
            external_agent_type: None,
            external_agent_icon: None,
            external_agent_workspace: None,
            platform: None,
            platform_thread_id: None,
        }
    }
}

/// Flat database row for a session; states travel as TEXT.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub repo_id: String,
    pub repo_display: String,
    pub base_ref: Option<String>,
    pub state: String,
    pub name: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub last_activity_at: String,
    pub exit_code: Option<i32>,
    pub runner_header: Option<String>,
    pub runner_session_id: Option<String>,
    pub adapter: Option<String>,
    pub directory: Option<String>,
    pub directory_has_git: bool,
    pub workdir_managed: bool,
    pub external_agent_id: Option<String>,
    pub external_agent_name: Option<String>,
    pub external_agent_type: Option<String>,
    pub external_agent_icon: Option<String>,
    pub external_agent_workspace: Option<String>,
    pub platform: Option<String>,
    pub platform_thread_id: Option<String>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            repo_id: row.repo_id,
            repo_display: row.repo_display,
            base_ref: row.base_ref,
            // Unknown states in old rows degrade to ERROR rather than panic.
            state: SessionState::parse(&row.state).unwrap_or(SessionState::Error),
            name: row.name,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            last_activity_at: row.last_activity_at,
            exit_code: row.exit_code,
            runner_header: row.runner_header,
            runner_session_id: row.runner_session_id,
            adapter: row.adapter,
            directory: row.directory,
            directory_has_git: row.directory_has_git,
            workdir_managed: row.workdir_managed,
            external_agent_id: row.external_agent_id,
            external_agent_name: row.external_agent_name,
            external_agent_type: row.external_agent_type,
            external_agent_icon: row.external_agent_icon,
            external_agent_workspace: row.external_agent_workspace,
            platform: row.platform,
            platform_thread_id: row.platform_thread_id,
        }
    }
}

/// A persisted conversation turn, distinct from the event wire log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: String,
    /// JSON-encoded content blocks.
    pub content: String,
    pub seq: i64,
    pub created_at: String,
}

impl Message {
    /// Decode the content blocks, defaulting to an empty array on damage.
    pub fn content_blocks(&self) -> Value {
        serde_json::from_str(&self.content).unwrap_or_else(|_| Value::Array(Vec::new()))
    }
}
