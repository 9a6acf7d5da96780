//! Approval and permission payloads.
//!
//! A permission request starts life runner-side (tool name + input),
//! travels through the event log, and is rendered to a human either in the
//! web UI or a chat thread. The resolution flows back as a
//! [`PermissionResult`] completing the store's oneshot future.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default seconds a request waits for a human before auto-deny.
pub const DEFAULT_APPROVAL_TIMEOUT_S: u64 = 300;

/// An approval request rendered to a human.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: String,
    /// Short label, typically the tool name.
    pub title: String,
    /// Rendered detail, typically the stringified tool input.
    pub description: String,
    /// Choices offered to the human, e.g. `["Allow", "Deny"]`.
    pub options: Vec<String>,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

fn default_timeout_s() -> u64 {
    DEFAULT_APPROVAL_TIMEOUT_S
}

impl ApprovalRequest {
    /// Build the standard Allow/Deny request for a tool invocation.
    pub fn for_tool(request_id: impl Into<String>, tool_name: &str, tool_input: &Value) -> Self {
        Self {
            request_id: request_id.into(),
            title: tool_name.to_string(),
            description: tool_input.to_string(),
            options: vec!["Allow".to_string(), "Deny".to_string()],
            timeout_s: DEFAULT_APPROVAL_TIMEOUT_S,
        }
    }
}

/// Outcome of a permission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResult {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_selected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl PermissionResult {
    pub fn allow(resolved_by: impl Into<String>) -> Self {
        Self {
            allowed: true,
            option_selected: Some("Allow".to_string()),
            message: None,
            resolved_by: Some(resolved_by.into()),
        }
    }

    pub fn deny(resolved_by: impl Into<String>, message: Option<String>) -> Self {
        Self {
            allowed: false,
            option_selected: Some("Deny".to_string()),
            message,
            resolved_by: Some(resolved_by.into()),
        }
    }

    /// The synthetic result applied when no human answers in time.
    pub fn timeout() -> Self {
        Self {
            allowed: false,
            option_selected: None,
            message: Some("timeout".to_string()),
            resolved_by: Some("timeout".to_string()),
        }
    }
}

/// Human input forwarded from a chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanInput {
    pub input_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}
