//! Local directory validation for the session create flow.

use axum::Json;
use axum::extract::Query;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::api::error::{ApiError, ApiResult};
use crate::fsutil::{has_git_repository, normalize_directory_path};

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub path: String,
}

/// Return metadata about a local directory path.
#[instrument(skip_all, fields(path = %query.path))]
pub async fn check_directory(Query(query): Query<CheckQuery>) -> ApiResult<Json<Value>> {
    if query.path.trim().is_empty() {
        return Err(ApiError::validation("path is required"));
    }
    let normalized = normalize_directory_path(&query.path);
    let exists = std::path::Path::new(&normalized).is_dir();
    let is_git = exists && has_git_repository(&normalized);
    info!(path = %normalized, exists, is_git, "Directory check completed");
    Ok(Json(json!({
        "path": normalized,
        "exists": exists,
        "is_git": is_git,
    })))
}
