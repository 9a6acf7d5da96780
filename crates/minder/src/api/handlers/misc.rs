//! Health check.

use axum::Json;
use serde_json::{Value, json};

pub async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": minder_protocol::PROTOCOL_VERSION,
    }))
}
