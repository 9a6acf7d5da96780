//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;

/// Service configuration.
///
/// Every knob has a default suitable for local development; deployments
/// override through `MINDER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Optional bearer token. When set, every API request must carry it.
    pub api_token: Option<String>,
    /// Root directory for the database, event logs, and bridge state.
    pub data_dir: PathBuf,
    /// Listen address for the HTTP server.
    pub bind_addr: String,
    /// Default runner adapter used when a session has none assigned.
    pub default_adapter: String,
    /// Command line for the `process` adapter, split on whitespace.
    pub process_cmd: Option<String>,
    /// Days before terminal sessions are pruned. `0` disables pruning.
    pub retention_days: i64,
    /// Seconds of inactivity before a RUNNING session is evicted. `0` disables.
    pub idle_timeout_s: u64,
    /// Interval between maintenance ticks.
    pub maintenance_interval_s: u64,
    /// SSE keepalive comment interval.
    pub sse_keepalive_s: u64,
    /// Seconds a permission request waits before auto-deny.
    pub permission_timeout_s: u64,
    /// Upper bound on a runner `stop` before the session is failed.
    pub stop_timeout_s: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_token: None,
            data_dir: default_data_dir(),
            bind_addr: "127.0.0.1:8787".to_string(),
            default_adapter: "echo".to_string(),
            process_cmd: None,
            retention_days: 7,
            idle_timeout_s: 0,
            maintenance_interval_s: 60,
            sse_keepalive_s: 15,
            permission_timeout_s: 300,
            stop_timeout_s: 10,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("minder")
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_token: env_nonempty("MINDER_TOKEN"),
            data_dir: env_nonempty("MINDER_DATA_DIR")
                .map(|raw| PathBuf::from(shellexpand::tilde(&raw).into_owned()))
                .unwrap_or(defaults.data_dir),
            bind_addr: env_nonempty("MINDER_BIND").unwrap_or(defaults.bind_addr),
            default_adapter: env_nonempty("MINDER_ADAPTER").unwrap_or(defaults.default_adapter),
            process_cmd: env_nonempty("MINDER_PROCESS_CMD"),
            retention_days: env_parsed("MINDER_RETENTION_DAYS", defaults.retention_days),
            idle_timeout_s: env_parsed("MINDER_IDLE_SECONDS", defaults.idle_timeout_s),
            maintenance_interval_s: env_parsed(
                "MINDER_MAINTENANCE_SECONDS",
                defaults.maintenance_interval_s,
            ),
            sse_keepalive_s: env_parsed("MINDER_SSE_KEEPALIVE_SECONDS", defaults.sse_keepalive_s),
            permission_timeout_s: env_parsed(
                "MINDER_PERMISSION_TIMEOUT_SECONDS",
                defaults.permission_timeout_s,
            ),
            stop_timeout_s: env_parsed("MINDER_STOP_TIMEOUT_SECONDS", defaults.stop_timeout_s),
        }
    }

    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }

    /// Root of the per-session event log directories.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.default_adapter, "echo");
        assert_eq!(settings.retention_days, 7);
        assert_eq!(settings.idle_timeout_s, 0);
        assert_eq!(settings.maintenance_interval_s, 60);
        assert_eq!(settings.sse_keepalive_s, 15);
        assert_eq!(settings.permission_timeout_s, 300);
        assert!(settings.api_token.is_none());
    }

    #[test]
    fn derived_paths_hang_off_data_dir() {
        let settings = Settings {
            data_dir: PathBuf::from("/tmp/minder-test"),
            ..Settings::default()
        };
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/tmp/minder-test/sessions.db")
        );
        assert_eq!(
            settings.sessions_dir(),
            PathBuf::from("/tmp/minder-test/sessions")
        );
    }
}
