//! Name→bridge registry and platform-tag dispatch.

use std::sync::Arc;

use anyhow::{Result, bail};
use dashmap::DashMap;
use serde_json::Value;
use tracing::info;

use minder_protocol::ApprovalRequest;

use super::BridgeInterface;

/// Registry of platform bridges keyed by platform tag.
#[derive(Default)]
pub struct BridgeManager {
    bridges: DashMap<String, Arc<dyn BridgeInterface>>,
}

impl BridgeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_bridge(&self, name: &str, bridge: Arc<dyn BridgeInterface>) {
        info!(platform = name, "Bridge registered");
        self.bridges.insert(name.to_string(), bridge);
    }

    pub fn get_bridge(&self, name: &str) -> Option<Arc<dyn BridgeInterface>> {
        self.bridges.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn platforms(&self) -> Vec<String> {
        self.bridges.iter().map(|e| e.key().clone()).collect()
    }

    fn require(&self, platform: &str) -> Result<Arc<dyn BridgeInterface>> {
        match self.get_bridge(platform) {
            Some(bridge) => Ok(bridge),
            None => bail!("No bridge registered for platform: {platform}"),
        }
    }

    pub async fn route_output(
        &self,
        session_id: &str,
        text: &str,
        platform: &str,
        metadata: Option<&Value>,
    ) -> Result<()> {
        self.require(platform)?
            .on_output(session_id, text, metadata)
            .await
    }

    pub async fn route_approval(
        &self,
        session_id: &str,
        request: &ApprovalRequest,
        platform: &str,
    ) -> Result<()> {
        self.require(platform)?
            .on_approval_request(session_id, request)
            .await
    }

    pub async fn route_status(
        &self,
        session_id: &str,
        status: &str,
        platform: &str,
        metadata: Option<&Value>,
    ) -> Result<()> {
        self.require(platform)?
            .on_status_change(session_id, status, metadata)
            .await
    }

    pub async fn route_typing(&self, session_id: &str, platform: &str) -> Result<()> {
        self.require(platform)?.on_typing(session_id).await
    }

    pub async fn create_thread(
        &self,
        session_id: &str,
        session_name: &str,
        platform: &str,
    ) -> Result<Value> {
        self.require(platform)?
            .create_thread(session_id, session_name)
            .await
    }
}
