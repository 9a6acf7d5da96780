//! Session lifecycle states and the transition table.
//!
//! The state machine is shared knowledge: the store validates transitions,
//! the API enforces preconditions against it, and bridges render states to
//! humans. Keeping it here avoids each layer growing its own copy.

use serde::{Deserialize, Serialize};

/// Lifecycle states for a supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Registered, runner not started yet.
    Created,
    /// Runner is actively working a turn.
    Running,
    /// Runner finished a turn and waits for the next human input.
    AwaitingInput,
    /// Interrupt requested, runner winding the turn down.
    Interrupting,
    /// Stop requested, runner shutting down.
    Stopping,
    /// Clean terminal state.
    Stopped,
    /// Failed terminal state.
    Error,
}

impl SessionState {
    /// Terminal states admit no outbound transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// States in which a runner turn may still be producing events.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Interrupting | Self::Stopping)
    }

    /// Whether the transition `self -> next` appears in the table.
    ///
    /// Any non-terminal state may fail into `Error`; everything else is
    /// enumerated explicitly. Self-transitions are not legal moves (callers
    /// treat them as idempotent no-ops instead).
    pub fn can_transition_to(self, next: SessionState) -> bool {
        if self == next {
            return false;
        }
        if next == Self::Error {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Running, Self::AwaitingInput)
                | (Self::AwaitingInput, Self::Running)
                | (Self::Running, Self::Interrupting)
                | (Self::AwaitingInput, Self::Interrupting)
                | (Self::Interrupting, Self::Stopped)
                | (Self::Running, Self::Stopping)
                | (Self::AwaitingInput, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }

    /// Wire representation (`"RUNNING"` etc.), matching the serde encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::AwaitingInput => "AWAITING_INPUT",
            Self::Interrupting => "INTERRUPTING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }

    /// Parse the wire representation back into a state.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(Self::Created),
            "RUNNING" => Some(Self::Running),
            "AWAITING_INPUT" => Some(Self::AwaitingInput),
            "INTERRUPTING" => Some(Self::Interrupting),
            "STOPPING" => Some(Self::Stopping),
            "STOPPED" => Some(Self::Stopped),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_can_only_start_or_fail() {
        assert!(SessionState::Created.can_transition_to(SessionState::Running));
        assert!(SessionState::Created.can_transition_to(SessionState::Error));
        assert!(!SessionState::Created.can_transition_to(SessionState::Stopped));
        assert!(!SessionState::Created.can_transition_to(SessionState::AwaitingInput));
        assert!(!SessionState::Created.can_transition_to(SessionState::Stopping));
    }

    #[test]
    fn running_awaiting_input_round_trip() {
        assert!(SessionState::Running.can_transition_to(SessionState::AwaitingInput));
        assert!(SessionState::AwaitingInput.can_transition_to(SessionState::Running));
    }

    #[test]
    fn interrupt_path_ends_stopped() {
        assert!(SessionState::Running.can_transition_to(SessionState::Interrupting));
        assert!(SessionState::Interrupting.can_transition_to(SessionState::Stopped));
        assert!(!SessionState::Interrupting.can_transition_to(SessionState::Running));
    }

    #[test]
    fn terminal_states_are_sinks() {
        for terminal in [SessionState::Stopped, SessionState::Error] {
            for next in [
                SessionState::Created,
                SessionState::Running,
                SessionState::AwaitingInput,
                SessionState::Interrupting,
                SessionState::Stopping,
                SessionState::Stopped,
                SessionState::Error,
            ] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} should be rejected"
                );
            }
        }
    }

    #[test]
    fn any_non_terminal_can_fail() {
        for state in [
            SessionState::Created,
            SessionState::Running,
            SessionState::AwaitingInput,
            SessionState::Interrupting,
            SessionState::Stopping,
        ] {
            assert!(state.can_transition_to(SessionState::Error));
        }
    }

    #[test]
    fn self_transition_is_not_a_move() {
        assert!(!SessionState::Running.can_transition_to(SessionState::Running));
        assert!(!SessionState::Error.can_transition_to(SessionState::Error));
    }

    #[test]
    fn wire_round_trip() {
        for state in [
            SessionState::Created,
            SessionState::Running,
            SessionState::AwaitingInput,
            SessionState::Interrupting,
            SessionState::Stopping,
            SessionState::Stopped,
            SessionState::Error,
        ] {
            assert_eq!(SessionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SessionState::parse("BOGUS"), None);
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&SessionState::AwaitingInput).unwrap();
        assert_eq!(json, "\"AWAITING_INPUT\"");
        let back: SessionState = serde_json::from_str("\"INTERRUPTING\"").unwrap();
        assert_eq!(back, SessionState::Interrupting);
    }
}
