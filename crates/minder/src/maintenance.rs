//! Background maintenance: retention pruning and idle-timeout eviction.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use minder_protocol::SessionState;

use crate::runner::RunnerRegistry;
use crate::session::{state::parse_ts, transition};
use crate::settings::Settings;
use crate::store::SessionStore;

/// Periodically prune expired sessions and stop idle runs.
///
/// Runs until the process exits; each tick is independently fallible so a
/// bad session never wedges the loop.
pub async fn maintenance_loop(
    store: Arc<SessionStore>,
    registry: Arc<RunnerRegistry>,
    settings: Arc<Settings>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(
        settings.maintenance_interval_s.max(1),
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = run_tick(&store, &registry, &settings).await {
            warn!(error = %err, "Maintenance tick failed");
        }
    }
}

/// One maintenance pass. Split out so tests can drive it directly.
pub async fn run_tick(
    store: &Arc<SessionStore>,
    registry: &Arc<RunnerRegistry>,
    settings: &Settings,
) -> anyhow::Result<()> {
    let removed = store.prune_sessions(settings.retention_days).await?;
    if removed > 0 {
        info!(count = removed, "Retention pruning removed sessions");
    }

    if settings.idle_timeout_s == 0 {
        return Ok(());
    }
    let now = chrono::Utc::now();
    for session in store.list_sessions() {
        if session.state != SessionState::Running {
            continue;
        }
        let Some(last) = parse_ts(&session.last_activity_at) else {
            continue;
        };
        let idle = now.signed_duration_since(last);
        if idle.num_seconds() <= settings.idle_timeout_s as i64 {
            continue;
        }

        warn!(session_id = %session.id, idle_s = idle.num_seconds(), "Idle timeout reached; stopping session");
        let mut session = session;
        if !transition(&mut session, SessionState::Stopping) {
            continue;
        }
        store.update_session(session.clone()).await?;
        let _ = store.emit_state(&session);

        let exit_code = match registry.get_runner(session.adapter.as_deref()).await {
            Ok(runner) => runner.stop(&session.id).await.unwrap_or(None),
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "No runner for idle eviction");
                None
            }
        };

        if let Some(mut session) = store.get_session(&session.id)
            && !session.state.is_terminal()
            && transition(&mut session, SessionState::Stopped)
        {
            session.exit_code = exit_code;
            store.update_session(session.clone()).await?;
            let _ = store.emit_state(&session);
        }
    }
    Ok(())
}
