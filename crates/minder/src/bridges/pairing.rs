//! Optional pairing gate for chat commands.
//!
//! When enabled, a chat user must prove possession of a one-time code
//! (read from the server log or console) before their commands are
//! accepted. A successful pairing consumes the code and mints a new one.

use std::collections::HashSet;
use std::sync::Mutex;

use rand::Rng;
use tracing::info;

struct PairingState {
    code: String,
    paired: HashSet<String>,
}

pub struct PairingGuard {
    enabled: bool,
    state: Mutex<PairingState>,
}

fn generate_code() -> String {
    let mut rng = rand::rng();
    format!("{:06}", rng.random_range(0..1_000_000u32))
}

impl PairingGuard {
    pub fn new(enabled: bool) -> Self {
        let code = generate_code();
        if enabled {
            info!(code, "Bridge pairing enabled; share this code with operators");
        }
        Self {
            enabled,
            state: Mutex::new(PairingState {
                code,
                paired: HashSet::new(),
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The code the next user must present. `None` when pairing is off.
    pub fn current_code(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        Some(self.state.lock().unwrap().code.clone())
    }

    /// Whether this user's commands are accepted.
    pub fn is_authorized(&self, user_id: &str) -> bool {
        if !self.enabled {
            return true;
        }
        self.state.lock().unwrap().paired.contains(user_id)
    }

    /// Attempt to pair a user with a presented code.
    ///
    /// Success consumes the code and generates a fresh one for the next
    /// user.
    pub fn try_pair(&self, user_id: &str, code: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let mut state = self.state.lock().unwrap();
        if state.code != code {
            return false;
        }
        state.paired.insert(user_id.to_string());
        state.code = generate_code();
        info!(user_id, "Bridge user paired");
        true
    }
}
