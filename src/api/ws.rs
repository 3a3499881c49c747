//! WebSocket channel per task

use crate::state::HasServices;
use crate::ws::{AxumSocket, TaskSocket};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::StreamExt;
use std::sync::Arc;

/// Upgrade to a WebSocket that receives every push for the task
#[utoipa::path(
    get,
    path = "/ws/tasks/{id}",
    tag = "Streaming",
    params(("id" = String, Path, description = "Task ID")),
    responses((status = 101, description = "Switching protocols"))
)]
pub async fn task_socket<S: HasServices>(
    State(state): State<S>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, id, socket))
}

async fn handle_socket<S: HasServices>(state: S, task_id: String, socket: WebSocket) {
    let (sink, mut inbound) = socket.split();
    let socket: Arc<dyn TaskSocket> = Arc::new(AxumSocket::new(sink));

    let snapshot = match state.task_service().get(&task_id).await {
        Ok(Some(task)) => Ok(task),
        Ok(None) => Err(format!("Task {} not found", task_id)),
        Err(e) => {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to load task for WebSocket");
            Err(format!("Failed to load task {}", task_id))
        }
    };

    let connections = state.connections();
    let id = connections.connect(&task_id, socket, snapshot).await;

    // Inbound frames are accepted but not acted on
    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                tracing::debug!(task_id = %task_id, text = %text.as_str(), "WebSocket message received");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(task_id = %task_id, error = %e, "WebSocket receive failed");
                break;
            }
        }
    }

    connections.disconnect(&task_id, id).await;
}
