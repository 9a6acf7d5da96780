//! Bearer token enforcement.
//!
//! When `MINDER_TOKEN` is configured, every request must carry
//! `Authorization: Bearer <token>`; otherwise requests pass through (dev
//! mode).

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::error::ApiError;
use super::state::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.settings.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let presented = header.and_then(|raw| {
        let (scheme, value) = raw.split_once(' ')?;
        scheme.eq_ignore_ascii_case("bearer").then_some(value)
    });

    match presented {
        Some(token) if token == expected => Ok(next.run(request).await),
        _ => Err(ApiError::Unauthorized(
            "Missing or invalid bearer token".to_string(),
        )),
    }
}
