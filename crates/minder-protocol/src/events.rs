//! Event envelope and type tags for the per-session event log.
//!
//! Events are the wire log of a session: everything a subscriber (SSE,
//! agent WebSocket, bridge loop) observes flows through this envelope. The
//! `data` payload stays opaque JSON on purpose; the type tag tells
//! consumers how much structure to expect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tags for session events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Incremental runner output (a step, a streamed chunk).
    Output,
    /// The accumulated final output blob for a turn.
    OutputFinal,
    /// Session lifecycle state changed.
    SessionState,
    /// Key/value telemetry from the runner (tokens, cost, model).
    Metadata,
    /// Periodic liveness signal while a turn is streaming.
    Heartbeat,
    /// Runner-reported failure.
    Error,
    /// Runner asks a human to approve a tool invocation.
    PermissionRequest,
    /// A permission request was decided.
    PermissionResolved,
    /// Human input forwarded into the session.
    HumanInput,
    /// Human response to an external agent's approval request.
    ApprovalResponse,
    /// An external agent's transport dropped; the session persists.
    AgentDisconnected,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::OutputFinal => "output_final",
            Self::SessionState => "session_state",
            Self::Metadata => "metadata",
            Self::Heartbeat => "heartbeat",
            Self::Error => "error",
            Self::PermissionRequest => "permission_request",
            Self::PermissionResolved => "permission_resolved",
            Self::HumanInput => "human_input",
            Self::ApprovalResponse => "approval_response",
            Self::AgentDisconnected => "agent_disconnected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "output" => Some(Self::Output),
            "output_final" => Some(Self::OutputFinal),
            "session_state" => Some(Self::SessionState),
            "metadata" => Some(Self::Metadata),
            "heartbeat" => Some(Self::Heartbeat),
            "error" => Some(Self::Error),
            "permission_request" => Some(Self::PermissionRequest),
            "permission_resolved" => Some(Self::PermissionResolved),
            "human_input" => Some(Self::HumanInput),
            "approval_response" => Some(Self::ApprovalResponse),
            "agent_disconnected" => Some(Self::AgentDisconnected),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sequenced event in a session's append-only log.
///
/// `seq` is dense and strictly increasing per session, starting at 1.
/// `ts` is an ISO-8601 UTC timestamp (`%Y-%m-%dT%H:%M:%SZ`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: String,
    pub seq: u64,
    pub ts: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    /// Whether the payload is flagged as a history replay.
    ///
    /// Bridges skip these so reconnecting a subscriber does not re-send old
    /// output to a chat thread.
    pub fn is_history(&self) -> bool {
        self.data
            .get("is_history")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// `data.text` as a string slice, if present.
    pub fn text(&self) -> Option<&str> {
        self.data.get("text").and_then(Value::as_str)
    }

    /// `data.final` as a bool (defaults to false).
    pub fn is_final(&self) -> bool {
        self.data
            .get("final")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips_through_json() {
        let event = EventEnvelope {
            session_id: "sess_abc".into(),
            seq: 7,
            ts: "2025-06-01T12:00:00Z".into(),
            event_type: EventType::Output,
            data: json!({"text": "hello", "final": true}),
        };
        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains("\"type\":\"output\""));
        let back: EventEnvelope = serde_json::from_str(&line).unwrap();
        assert_eq!(back.seq, 7);
        assert_eq!(back.event_type, EventType::Output);
        assert_eq!(back.text(), Some("hello"));
        assert!(back.is_final());
    }

    #[test]
    fn type_tags_round_trip() {
        for ty in [
            EventType::Output,
            EventType::OutputFinal,
            EventType::SessionState,
            EventType::Metadata,
            EventType::Heartbeat,
            EventType::Error,
            EventType::PermissionRequest,
            EventType::PermissionResolved,
            EventType::HumanInput,
            EventType::ApprovalResponse,
            EventType::AgentDisconnected,
        ] {
            assert_eq!(EventType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(EventType::parse("nope"), None);
    }

    #[test]
    fn history_flag_defaults_to_false() {
        let event = EventEnvelope {
            session_id: "sess_abc".into(),
            seq: 1,
            ts: "2025-06-01T12:00:00Z".into(),
            event_type: EventType::Output,
            data: json!({"text": "x"}),
        };
        assert!(!event.is_history());
        assert!(!event.is_final());

        let replay = EventEnvelope {
            data: json!({"text": "x", "is_history": true}),
            ..event
        };
        assert!(replay.is_history());
    }

    #[test]
    fn missing_data_deserializes_to_null() {
        let back: EventEnvelope = serde_json::from_str(
            r#"{"session_id":"s","seq":1,"ts":"2025-06-01T12:00:00Z","type":"heartbeat"}"#,
        )
        .unwrap();
        assert!(back.data.is_null());
        assert_eq!(back.text(), None);
    }
}
