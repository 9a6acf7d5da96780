//! Applying lifecycle transitions to session records.
//!
//! Legality lives in `minder_protocol::SessionState`; this module applies
//! the side effects: timestamps, and the name inference rule.

use chrono::Utc;

use minder_protocol::SessionState;

use super::models::Session;

/// Maximum characters kept of an inferred or assigned session name.
pub const MAX_NAME_LEN: usize = 80;

/// Current UTC time in the wire timestamp format.
pub fn now_ts() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse a wire timestamp back into a `DateTime<Utc>`.
pub fn parse_ts(value: &str) -> Option<chrono::DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Attempt the transition `session.state -> next`, applying timestamps.
///
/// Returns false (leaving the record untouched) when the move is not in
/// the transition table. On success:
/// - `started_at` is set on first entry into RUNNING,
/// - `ended_at` is set on entry into a terminal state,
/// - `last_activity_at` is refreshed on any non-terminal transition.
pub fn transition(session: &mut Session, next: SessionState) -> bool {
    if !session.state.can_transition_to(next) {
        return false;
    }
    let now = now_ts();
    session.state = next;
    if next == SessionState::Running && session.started_at.is_none() {
        session.started_at = Some(now.clone());
    }
    if next.is_terminal() {
        session.ended_at = Some(now);
    } else {
        session.last_activity_at = now;
    }
    true
}

/// Assign a name from the first non-empty prompt or input.
///
/// Internal whitespace collapses to single spaces and the result is
/// truncated to [`MAX_NAME_LEN`] characters. Already-named sessions are
/// left alone. Returns true when the name was set.
pub fn maybe_set_session_name(session: &mut Session, text: &str) -> bool {
    if session.name.is_some() {
        return false;
    }
    let cleaned = clean_name(text);
    if cleaned.is_empty() {
        return false;
    }
    session.name = Some(cleaned);
    true
}

/// Collapse whitespace and truncate to the name limit.
pub fn clean_name(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_session() -> Session {
        Session::new(
            "sess_test".into(),
            "repo_test".into(),
            None,
            "2020-01-01T00:00:00Z".into(),
        )
    }

    #[test]
    fn start_sets_started_at_once() {
        let mut session = make_session();
        assert!(transition(&mut session, SessionState::Running));
        let first_started = session.started_at.clone();
        assert!(first_started.is_some());

        assert!(transition(&mut session, SessionState::AwaitingInput));
        assert!(transition(&mut session, SessionState::Running));
        assert_eq!(session.started_at, first_started);
    }

    #[test]
    fn terminal_transition_sets_ended_at() {
        let mut session = make_session();
        transition(&mut session, SessionState::Running);
        transition(&mut session, SessionState::Stopping);
        assert!(session.ended_at.is_none());
        assert!(transition(&mut session, SessionState::Stopped));
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn illegal_transition_leaves_record_untouched() {
        let mut session = make_session();
        let before = session.clone();
        assert!(!transition(&mut session, SessionState::Stopped));
        assert_eq!(session.state, before.state);
        assert_eq!(session.last_activity_at, before.last_activity_at);
    }

    #[test]
    fn non_terminal_transition_refreshes_activity() {
        let mut session = make_session();
        let stale = session.last_activity_at.clone();
        assert!(transition(&mut session, SessionState::Running));
        assert_ne!(session.last_activity_at, stale);
    }

    #[test]
    fn error_reachable_from_any_non_terminal() {
        let mut session = make_session();
        transition(&mut session, SessionState::Running);
        assert!(transition(&mut session, SessionState::Error));
        assert!(session.ended_at.is_some());
        assert!(!transition(&mut session, SessionState::Running));
    }

    #[test]
    fn name_inference_collapses_and_truncates() {
        let mut session = make_session();
        assert!(maybe_set_session_name(&mut session, "  fix\tthe   bug  "));
        assert_eq!(session.name.as_deref(), Some("fix the bug"));

        let mut long = make_session();
        let text = "x".repeat(200);
        maybe_set_session_name(&mut long, &text);
        assert_eq!(long.name.as_ref().unwrap().chars().count(), MAX_NAME_LEN);
    }

    #[test]
    fn name_inference_skips_named_and_empty() {
        let mut session = make_session();
        session.name = Some("kept".into());
        assert!(!maybe_set_session_name(&mut session, "replacement"));
        assert_eq!(session.name.as_deref(), Some("kept"));

        let mut blank = make_session();
        assert!(!maybe_set_session_name(&mut blank, "   \n "));
        assert!(blank.name.is_none());
    }

    #[test]
    fn timestamps_round_trip() {
        let ts = now_ts();
        assert!(parse_ts(&ts).is_some());
        assert!(parse_ts("garbage").is_none());
    }
}
