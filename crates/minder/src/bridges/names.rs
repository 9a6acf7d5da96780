//! Unique thread names within one bridge process.
//!
//! Platforms tolerate duplicate thread names but humans don't; when the
//! natural name is already claimed, a numeric suffix keeps the chat list
//! tidy.

use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
pub struct ThreadNameRegistry {
    claimed: Mutex<HashSet<String>>,
}

impl ThreadNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a unique thread name, suffixing `_2`, `_3`, ... on collision.
    pub fn claim(&self, name: &str) -> String {
        let mut claimed = self.claimed.lock().unwrap();
        if claimed.insert(name.to_string()) {
            return name.to_string();
        }
        for n in 2.. {
            let candidate = format!("{name}_{n}");
            if claimed.insert(candidate.clone()) {
                return candidate;
            }
        }
        unreachable!("suffix space exhausted");
    }

    /// Release a name so it can be claimed again.
    pub fn release(&self, name: &str) {
        self.claimed.lock().unwrap().remove(name);
    }

    pub fn is_claimed(&self, name: &str) -> bool {
        self.claimed.lock().unwrap().contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_keeps_natural_name() {
        let registry = ThreadNameRegistry::new();
        assert_eq!(registry.claim("fix the bug"), "fix the bug");
    }

    #[test]
    fn collisions_get_numeric_suffixes() {
        let registry = ThreadNameRegistry::new();
        assert_eq!(registry.claim("review"), "review");
        assert_eq!(registry.claim("review"), "review_2");
        assert_eq!(registry.claim("review"), "review_3");
    }

    #[test]
    fn released_names_are_reusable() {
        let registry = ThreadNameRegistry::new();
        registry.claim("task");
        registry.release("task");
        assert_eq!(registry.claim("task"), "task");
    }

    #[test]
    fn suffixed_names_do_not_collide_with_explicit_claims() {
        let registry = ThreadNameRegistry::new();
        assert_eq!(registry.claim("job_2"), "job_2");
        assert_eq!(registry.claim("job"), "job");
        // "job_2" is taken, so the duplicate of "job" skips to "_3".
        assert_eq!(registry.claim("job"), "job_3");
    }
}
