//! Auto-approve timers for approval requests.
//!
//! Once a human picks "Allow All (30m)" or "Allow <tool> (30m)", incoming
//! requests for that session (or that tool) auto-resolve as allowed until
//! the timer lapses.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Default lifetime of an allow timer.
pub const ALLOW_DURATION: Duration = Duration::from_secs(30 * 60);

/// Why a request was auto-approved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowReason {
    All,
    Tool(String),
}

impl std::fmt::Display for AllowReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "Allow All"),
            Self::Tool(tool) => write!(f, "Allow {tool}"),
        }
    }
}

/// Per-session and per-tool auto-approve expiries.
pub struct AllowTimers {
    duration: Duration,
    all_until: DashMap<String, Instant>,
    tool_until: DashMap<(String, String), Instant>,
}

impl AllowTimers {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            all_until: DashMap::new(),
            tool_until: DashMap::new(),
        }
    }

    /// Auto-approve everything for this session for the timer duration.
    pub fn set_allow_all(&self, session_id: &str) {
        self.all_until
            .insert(session_id.to_string(), Instant::now() + self.duration);
    }

    /// Auto-approve one tool for this session for the timer duration.
    pub fn set_allow_tool(&self, session_id: &str, tool_name: &str) {
        self.tool_until.insert(
            (session_id.to_string(), tool_name.to_string()),
            Instant::now() + self.duration,
        );
    }

    /// Whether a request for `tool_name` is currently auto-approved.
    pub fn check(&self, session_id: &str, tool_name: &str) -> Option<AllowReason> {
        let now = Instant::now();
        if let Some(expiry) = self.all_until.get(session_id)
            && now < *expiry
        {
            return Some(AllowReason::All);
        }
        if let Some(expiry) = self
            .tool_until
            .get(&(session_id.to_string(), tool_name.to_string()))
            && now < *expiry
        {
            return Some(AllowReason::Tool(tool_name.to_string()));
        }
        None
    }

    /// Drop all timers for a session.
    pub fn clear(&self, session_id: &str) {
        self.all_until.remove(session_id);
        self.tool_until.retain(|(sid, _), _| sid != session_id);
    }
}

impl Default for AllowTimers {
    fn default() -> Self {
        Self::new(ALLOW_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_approves_every_tool() {
        let timers = AllowTimers::default();
        assert!(timers.check("sess_1", "Bash").is_none());
        timers.set_allow_all("sess_1");
        assert_eq!(timers.check("sess_1", "Bash"), Some(AllowReason::All));
        assert_eq!(timers.check("sess_1", "Edit"), Some(AllowReason::All));
        assert!(timers.check("sess_2", "Bash").is_none());
    }

    #[test]
    fn allow_tool_is_scoped_to_one_tool() {
        let timers = AllowTimers::default();
        timers.set_allow_tool("sess_1", "Bash");
        assert_eq!(
            timers.check("sess_1", "Bash"),
            Some(AllowReason::Tool("Bash".to_string()))
        );
        assert!(timers.check("sess_1", "Edit").is_none());
    }

    #[test]
    fn timers_expire() {
        let timers = AllowTimers::new(Duration::from_millis(20));
        timers.set_allow_all("sess_1");
        timers.set_allow_tool("sess_1", "Bash");
        std::thread::sleep(Duration::from_millis(40));
        assert!(timers.check("sess_1", "Bash").is_none());
    }

    #[test]
    fn clear_drops_session_timers() {
        let timers = AllowTimers::default();
        timers.set_allow_all("sess_1");
        timers.set_allow_tool("sess_1", "Bash");
        timers.set_allow_tool("sess_2", "Bash");
        timers.clear("sess_1");
        assert!(timers.check("sess_1", "Bash").is_none());
        assert!(timers.check("sess_2", "Bash").is_some());
    }

    #[test]
    fn reason_renders_for_notifications() {
        assert_eq!(AllowReason::All.to_string(), "Allow All");
        assert_eq!(AllowReason::Tool("Bash".into()).to_string(), "Allow Bash");
    }
}
