//! Canonical protocol types shared between the minder backend, its runner
//! adapters, and external agents.
//!
//! This crate is intentionally free of I/O: it holds the serde types that
//! travel over the wire (event envelopes, approval payloads, agent
//! WebSocket frames) plus the pure session state machine that everything
//! else agrees on.

pub mod agent_ws;
pub mod approvals;
pub mod events;
pub mod state;

pub use agent_ws::{AgentMetadata, AgentToServer, ServerToAgent};
pub use approvals::{ApprovalRequest, PermissionResult};
pub use events::{EventEnvelope, EventType};
pub use state::SessionState;

/// Protocol revision advertised by the health endpoint.
pub const PROTOCOL_VERSION: u32 = 1;
