//! Adapter registry caching one runner instance per adapter name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::settings::Settings;
use crate::store::SessionStore;

use super::echo::EchoRunner;
use super::process::ProcessRunner;
use super::{Runner, RunnerEvents};

/// Adapter names the registry can construct.
pub const KNOWN_ADAPTERS: &[&str] = &["echo", "process"];

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Unknown agent adapter: {0}")]
    Unknown(String),
    #[error("Adapter '{0}' is not configured: {1}")]
    Misconfigured(&'static str, String),
}

/// Caches runner instances keyed by adapter name.
///
/// Construction happens under the registry's own lock, so adapters don't
/// need thread-safe constructors. `None` selects the default adapter from
/// settings.
pub struct RunnerRegistry {
    store: Arc<SessionStore>,
    events: Arc<dyn RunnerEvents>,
    default_adapter: String,
    process_cmd: Option<String>,
    stop_timeout: Duration,
    runners: Mutex<HashMap<String, Arc<dyn Runner>>>,
}

impl RunnerRegistry {
    pub fn new(
        store: Arc<SessionStore>,
        events: Arc<dyn RunnerEvents>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            events,
            default_adapter: settings.default_adapter.clone(),
            process_cmd: settings.process_cmd.clone(),
            stop_timeout: Duration::from_secs(settings.stop_timeout_s),
            runners: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_adapter(&self) -> &str {
        &self.default_adapter
    }

    /// Fail fast for adapter names the registry cannot construct.
    pub fn validate_adapter(&self, name: &str) -> Result<(), AdapterError> {
        match name {
            "echo" => Ok(()),
            "process" => {
                if self.process_cmd.is_none() {
                    return Err(AdapterError::Misconfigured(
                        "process",
                        "MINDER_PROCESS_CMD is not set".to_string(),
                    ));
                }
                Ok(())
            }
            other => Err(AdapterError::Unknown(other.to_string())),
        }
    }

    /// Return the cached runner for an adapter, constructing on first use.
    pub async fn get_runner(&self, adapter: Option<&str>) -> Result<Arc<dyn Runner>, AdapterError> {
        let name = adapter.unwrap_or(&self.default_adapter).to_string();
        let mut runners = self.runners.lock().await;
        if let Some(runner) = runners.get(&name) {
            return Ok(Arc::clone(runner));
        }

        let runner: Arc<dyn Runner> = match name.as_str() {
            "echo" => Arc::new(EchoRunner::new(
                Arc::clone(&self.store),
                Arc::clone(&self.events),
            )),
            "process" => {
                let Some(cmd) = self.process_cmd.as_deref() else {
                    return Err(AdapterError::Misconfigured(
                        "process",
                        "MINDER_PROCESS_CMD is not set".to_string(),
                    ));
                };
                let runner = ProcessRunner::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.events),
                    cmd,
                    self.stop_timeout,
                )
                .map_err(|err| AdapterError::Misconfigured("process", err.to_string()))?;
                Arc::new(runner)
            }
            other => return Err(AdapterError::Unknown(other.to_string())),
        };

        info!(adapter = %name, "Constructed runner adapter");
        runners.insert(name, Arc::clone(&runner));
        Ok(runner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::runner::ApiRunnerEvents;
    use crate::store::SessionRepository;

    async fn make_registry(settings: Settings) -> RunnerRegistry {
        let dir = tempfile::tempdir().unwrap();
        let repo = SessionRepository::new(Database::open_in_memory().await.unwrap());
        let store = Arc::new(
            SessionStore::open(repo, dir.path().join("sessions"))
                .await
                .unwrap(),
        );
        let events = Arc::new(ApiRunnerEvents::new(
            Arc::clone(&store),
            Duration::from_secs(300),
        ));
        RunnerRegistry::new(store, events, &settings)
    }

    #[tokio::test]
    async fn default_adapter_comes_from_settings() {
        let registry = make_registry(Settings::default()).await;
        assert_eq!(registry.default_adapter(), "echo");
        let runner = registry.get_runner(None).await.unwrap();
        assert_eq!(runner.runner_type(), "echo");
    }

    #[tokio::test]
    async fn runners_are_cached_per_adapter() {
        let registry = make_registry(Settings::default()).await;
        let first = registry.get_runner(Some("echo")).await.unwrap();
        let second = registry.get_runner(Some("echo")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn unknown_adapter_is_rejected() {
        let registry = make_registry(Settings::default()).await;
        assert!(matches!(
            registry.validate_adapter("quantum"),
            Err(AdapterError::Unknown(_))
        ));
        assert!(registry.get_runner(Some("quantum")).await.is_err());
    }

    #[tokio::test]
    async fn process_adapter_requires_configured_command() {
        let registry = make_registry(Settings::default()).await;
        assert!(matches!(
            registry.validate_adapter("process"),
            Err(AdapterError::Misconfigured(_, _))
        ));

        let configured = make_registry(Settings {
            process_cmd: Some("cat".to_string()),
            ..Settings::default()
        })
        .await;
        assert!(configured.validate_adapter("process").is_ok());
        let runner = configured.get_runner(Some("process")).await.unwrap();
        assert_eq!(runner.runner_type(), "process");
    }

    #[tokio::test]
    async fn distinct_adapters_get_distinct_runners() {
        let registry = make_registry(Settings {
            process_cmd: Some("cat".to_string()),
            ..Settings::default()
        })
        .await;
        let echo = registry.get_runner(Some("echo")).await.unwrap();
        let process = registry.get_runner(Some("process")).await.unwrap();
        assert_ne!(echo.runner_type(), process.runner_type());
    }
}
