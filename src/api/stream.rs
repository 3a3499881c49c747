//! SSE endpoints

use crate::state::HasServices;
use crate::streaming::{self, StreamEvent, StreamSettings};
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{Stream, StreamExt};
use std::convert::Infallible;

fn settings<S: HasServices>(state: &S) -> StreamSettings {
    let tasks = &state.config().tasks;
    StreamSettings {
        poll_interval: tasks.stream_poll_interval(),
        max_duration: tasks.stream_max_duration(),
    }
}

fn into_sse<St>(events: St) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    St: Stream<Item = StreamEvent> + Send + 'static,
{
    Sse::new(events.map(|event| Ok::<_, Infallible>(event.into_event())))
        .keep_alive(KeepAlive::default())
}

/// Log lines and status of a task as server-sent events
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}/logs/stream",
    tag = "Streaming",
    params(("id" = String, Path, description = "Task ID")),
    responses((status = 200, description = "text/event-stream of log, status, done or error events"))
)]
pub async fn log_stream<S: HasServices>(
    State(state): State<S>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(task_id = %id, "Log stream opened");
    into_sse(streaming::log_stream(
        state.task_service().clone(),
        id,
        settings(&state),
    ))
}

/// Full task snapshots as server-sent events
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}/stream",
    tag = "Streaming",
    params(("id" = String, Path, description = "Task ID")),
    responses((status = 200, description = "text/event-stream of init, update, complete or error events"))
)]
pub async fn update_stream<S: HasServices>(
    State(state): State<S>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(task_id = %id, "Update stream opened");
    into_sse(streaming::update_stream(
        state.task_service().clone(),
        id,
        settings(&state),
    ))
}
