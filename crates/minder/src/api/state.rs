//! Shared application state for API handlers.

use std::sync::Arc;

use crate::bridges::{BridgeManager, BridgeSubscriber};
use crate::runner::RunnerRegistry;
use crate::settings::Settings;
use crate::store::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub registry: Arc<RunnerRegistry>,
    pub bridges: Arc<BridgeManager>,
    pub bridge_subscriber: Arc<BridgeSubscriber>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<RunnerRegistry>,
        bridges: Arc<BridgeManager>,
        bridge_subscriber: Arc<BridgeSubscriber>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            registry,
            bridges,
            bridge_subscriber,
            settings: Arc::new(settings),
        }
    }
}
