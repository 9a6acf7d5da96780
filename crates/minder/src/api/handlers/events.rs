//! Event replay and the SSE live stream.

use std::collections::HashSet;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Json;
use axum::extract::{Path as UrlPath, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::instrument;

use minder_protocol::{EventEnvelope, EventType};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::SessionStore;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since_seq: u64,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Optional comma-separated type filter, e.g. `output,error`.
    #[serde(default)]
    pub types: Option<String>,
}

/// Replay logged events with `seq > since_seq`.
#[instrument(skip(state, query))]
pub async fn get_events(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .get_session(&session_id)
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    let type_filter: Option<HashSet<EventType>> = query.types.as_deref().map(|raw| {
        raw.split(',')
            .filter_map(|tag| EventType::parse(tag.trim()))
            .collect()
    });

    let events: Vec<EventEnvelope> = state
        .store
        .read_event_log(&session_id, query.since_seq, query.limit)
        .into_iter()
        .filter(|event| {
            type_filter
                .as_ref()
                .map(|types| types.contains(&event.event_type))
                .unwrap_or(true)
        })
        .collect();

    Ok(Json(json!({ "events": events })))
}

/// A live subscriber queue exposed as an SSE body.
///
/// Dropping the stream (client disconnect) unregisters the queue.
struct SubscriberStream {
    store: Arc<SessionStore>,
    session_id: String,
    subscriber_id: u64,
    rx: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl Stream for SubscriberStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|maybe| {
            maybe.map(|envelope| {
                let payload =
                    serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
                Ok(Event::default().data(payload))
            })
        })
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        self.store
            .remove_subscriber(&self.session_id, self.subscriber_id);
    }
}

/// SSE stream of a session's live events.
#[instrument(skip(state))]
pub async fn sse_events(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    state
        .store
        .get_session(&session_id)
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    let (subscriber_id, rx) = state.store.new_subscriber(&session_id);
    let stream = SubscriberStream {
        store: Arc::clone(&state.store),
        session_id,
        subscriber_id,
        rx,
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.settings.sse_keepalive_s))
            .text("keepalive"),
    ))
}
