//! minder server binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use minder::api::{AppState, create_router};
use minder::bridges::{BridgeManager, BridgeSubscriber};
use minder::db::Database;
use minder::maintenance::maintenance_loop;
use minder::runner::{ApiRunnerEvents, RunnerRegistry};
use minder::settings::Settings;
use minder::store::{SessionRepository, SessionStore};

/// Session supervision and event fanout for AI coding agents.
#[derive(Debug, Parser)]
#[command(name = "minder", version)]
struct Args {
    /// Listen address (overrides MINDER_BIND).
    #[arg(long)]
    bind: Option<String>,

    /// Data directory (overrides MINDER_DATA_DIR).
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env();
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    if let Some(data_dir) = args.data_dir {
        settings.data_dir = data_dir;
    }

    info!(
        data_dir = %settings.data_dir.display(),
        adapter = %settings.default_adapter,
        "Starting minder"
    );

    let db = Database::open(&settings.database_path()).await?;
    let repo = SessionRepository::new(db);
    let store = Arc::new(SessionStore::open(repo, settings.sessions_dir()).await?);

    let events = Arc::new(ApiRunnerEvents::new(
        Arc::clone(&store),
        Duration::from_secs(settings.permission_timeout_s),
    ));
    let registry = Arc::new(RunnerRegistry::new(
        Arc::clone(&store),
        events,
        &settings,
    ));
    let bridges = Arc::new(BridgeManager::new());
    let bridge_subscriber = Arc::new(BridgeSubscriber::new(
        Arc::clone(&store),
        Arc::clone(&bridges),
    ));

    // Re-attach bridge subscribers for sessions bound before a restart.
    for session in store.list_sessions() {
        if let Some(platform) = &session.platform {
            bridge_subscriber.subscribe(&session.id, platform);
        }
    }

    let state = AppState::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        bridges,
        bridge_subscriber,
        settings.clone(),
    );

    tokio::spawn(maintenance_loop(
        Arc::clone(&store),
        registry,
        Arc::clone(&state.settings),
    ));

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "minder listening");
    axum::serve(listener, app).await.context("serving API")?;
    Ok(())
}
