//! API route definitions.

use axum::{
    Router, middleware,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::auth::auth_middleware;
use super::handlers::{self, external};
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let api = Router::new()
        .route("/api/health", get(handlers::health))
        // Session management
        .route(
            "/api/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/api/sessions/{session_id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/api/sessions/{session_id}/start",
            post(handlers::start_session),
        )
        .route(
            "/api/sessions/{session_id}/input",
            post(handlers::send_input),
        )
        .route(
            "/api/sessions/{session_id}/stop",
            post(handlers::stop_session),
        )
        .route(
            "/api/sessions/{session_id}/interrupt",
            post(handlers::interrupt_session),
        )
        .route(
            "/api/sessions/{session_id}/permission",
            post(handlers::resolve_permission),
        )
        .route(
            "/api/sessions/{session_id}/approval-mode",
            patch(handlers::set_approval_mode),
        )
        .route(
            "/api/sessions/{session_id}/rename",
            patch(handlers::rename_session),
        )
        .route(
            "/api/sessions/{session_id}/events",
            get(handlers::get_events),
        )
        .route("/api/sessions/{session_id}/usage", get(handlers::get_usage))
        .route("/api/sessions/{session_id}/diff", get(handlers::get_diff))
        // SSE live stream
        .route(
            "/events/sessions/{session_id}",
            get(handlers::sse_events),
        )
        // Directory validation
        .route("/api/directories/check", get(handlers::check_directory))
        // External agents
        .route(
            "/api/external/sessions",
            post(external::create_external_session),
        )
        .route(
            "/api/external/sessions/{session_id}/events",
            post(external::post_agent_event).get(external::get_pending_events),
        )
        .route(
            "/api/external/sessions/{session_id}/approvals/{request_id}/respond",
            post(external::respond_to_approval),
        )
        .route("/external/ws", get(external::agent_websocket))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    api.layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
