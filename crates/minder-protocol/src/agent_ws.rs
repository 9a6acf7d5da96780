//! External agent WebSocket wire protocol.
//!
//! An external agent connects to `/external/ws`, registers, optionally
//! creates a session (which binds it to a chat platform thread), then
//! streams events and polls for human responses. Messages are tagged JSON
//! frames in both directions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventEnvelope;

/// Identity an external agent presents on registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

fn default_icon() -> String {
    "🤖".to_string()
}

/// Frames sent by the agent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentToServer {
    /// Must be the first frame on the socket.
    Register { agent_metadata: AgentMetadata },

    /// Create a session bound to a chat platform thread.
    CreateSession {
        #[serde(default)]
        session_name: Option<String>,
        #[serde(default)]
        platform: Option<String>,
    },

    /// Forward an agent event (output, approval_request, status).
    Event { data: Value },

    /// Poll for queued human input / approval responses.
    PollEvents {
        #[serde(default)]
        since_seq: u64,
    },
}

/// Frames sent by the server to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToAgent {
    /// Registration accepted.
    Registered { agent_id: String },

    /// Session created and thread bound.
    SessionCreated {
        session_id: String,
        thread_info: Value,
    },

    /// Event frame accepted.
    Ack,

    /// Response to a poll.
    Events { events: Vec<EventEnvelope> },

    /// Protocol or routing error; the socket stays usable.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_frame_parses() {
        let frame: AgentToServer = serde_json::from_value(json!({
            "type": "register",
            "agent_metadata": {"name": "researcher", "type": "crawler"}
        }))
        .unwrap();
        match frame {
            AgentToServer::Register { agent_metadata } => {
                assert_eq!(agent_metadata.name, "researcher");
                assert_eq!(agent_metadata.icon, "🤖");
                assert!(agent_metadata.workspace.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn create_session_defaults_are_none() {
        let frame: AgentToServer =
            serde_json::from_value(json!({"type": "create_session"})).unwrap();
        match frame {
            AgentToServer::CreateSession {
                session_name,
                platform,
            } => {
                assert!(session_name.is_none());
                assert!(platform.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn poll_events_defaults_since_seq() {
        let frame: AgentToServer = serde_json::from_value(json!({"type": "poll_events"})).unwrap();
        match frame {
            AgentToServer::PollEvents { since_seq } => assert_eq!(since_seq, 0),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn server_frames_tag_correctly() {
        let registered = serde_json::to_value(ServerToAgent::Registered {
            agent_id: "agent_12ab34cd".into(),
        })
        .unwrap();
        assert_eq!(registered["type"], "registered");

        let ack = serde_json::to_value(ServerToAgent::Ack).unwrap();
        assert_eq!(ack, json!({"type": "ack"}));

        let err = serde_json::to_value(ServerToAgent::Error {
            message: "no active session".into(),
        })
        .unwrap();
        assert_eq!(err["type"], "error");
    }
}
