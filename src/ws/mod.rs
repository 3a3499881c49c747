//! WebSocket connection registry and push primitives
//!
//! The registry maps a task id to its open sockets. The lock guards list
//! mutation only; every send happens on a snapshot taken under the lock, so a
//! slow peer never blocks registration or other broadcasts.

use crate::domain::{Task, TaskStatus};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("websocket closed")]
pub struct SocketClosed;

/// Outbound half of a client connection
#[async_trait]
pub trait TaskSocket: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), SocketClosed>;
}

/// [`TaskSocket`] over the sink half of an axum [`WebSocket`]
pub struct AxumSocket {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl AxumSocket {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl TaskSocket for AxumSocket {
    async fn send_text(&self, text: String) -> Result<(), SocketClosed> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| SocketClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// Messages pushed to subscribers, tagged by `type`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    Init {
        task_id: String,
        data: Box<Task>,
    },
    Progress {
        task_id: String,
        progress: f64,
        step: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        log: Option<String>,
    },
    Status {
        task_id: String,
        status: TaskStatus,
    },
    Log {
        task_id: String,
        message: String,
    },
    Error {
        task_id: String,
        error: String,
    },
    Complete {
        task_id: String,
        data: Box<Task>,
    },
}

impl WsMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WsMessage::Init { .. } => "init",
            WsMessage::Progress { .. } => "progress",
            WsMessage::Status { .. } => "status",
            WsMessage::Log { .. } => "log",
            WsMessage::Error { .. } => "error",
            WsMessage::Complete { .. } => "complete",
        }
    }
}

type Registry = HashMap<String, Vec<(ConnectionId, Arc<dyn TaskSocket>)>>;

/// Process-wide task id -> sockets registry
#[derive(Default)]
pub struct ConnectionManager {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket and greet it with `init`, or `error` when the task
    /// could not be loaded. The greeting goes to this socket only.
    pub async fn connect(
        &self,
        task_id: &str,
        socket: Arc<dyn TaskSocket>,
        snapshot: Result<Task, String>,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut registry = self.registry.lock().await;
            registry
                .entry(task_id.to_string())
                .or_default()
                .push((id, socket.clone()));
            update_gauge(&registry);
        }
        tracing::info!(task_id, connection = id.0, "WebSocket connected");

        let greeting = match snapshot {
            Ok(task) => WsMessage::Init {
                task_id: task_id.to_string(),
                data: Box::new(task),
            },
            Err(error) => WsMessage::Error {
                task_id: task_id.to_string(),
                error,
            },
        };
        if !self.send_to(socket.as_ref(), &greeting).await {
            self.disconnect(task_id, id).await;
        }
        id
    }

    /// Remove a socket; unknown ids are ignored. Returns whether anything
    /// was removed.
    pub async fn disconnect(&self, task_id: &str, id: ConnectionId) -> bool {
        let mut registry = self.registry.lock().await;
        let Some(sockets) = registry.get_mut(task_id) else {
            return false;
        };
        let before = sockets.len();
        sockets.retain(|(conn, _)| *conn != id);
        let removed = sockets.len() != before;
        if sockets.is_empty() {
            registry.remove(task_id);
        }
        if removed {
            update_gauge(&registry);
            tracing::info!(task_id, connection = id.0, "WebSocket disconnected");
        }
        removed
    }

    /// Send to every socket of a task. Sockets that fail are dropped from the
    /// registry; returns the number of successful deliveries.
    pub async fn broadcast(&self, task_id: &str, message: &WsMessage) -> usize {
        let sockets: Vec<(ConnectionId, Arc<dyn TaskSocket>)> = {
            let registry = self.registry.lock().await;
            match registry.get(task_id) {
                Some(sockets) => sockets.clone(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, socket) in &sockets {
            if self.send_to(socket.as_ref(), message).await {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            tracing::debug!(task_id, connection = id.0, "Dropping dead WebSocket");
            self.disconnect(task_id, id).await;
        }
        delivered
    }

    pub async fn broadcast_progress(
        &self,
        task_id: &str,
        progress: f64,
        step: &str,
        log: Option<&str>,
    ) -> usize {
        let message = WsMessage::Progress {
            task_id: task_id.to_string(),
            progress,
            step: step.to_string(),
            log: log.map(str::to_string),
        };
        self.broadcast(task_id, &message).await
    }

    pub async fn broadcast_status(&self, task_id: &str, status: TaskStatus) -> usize {
        let message = WsMessage::Status {
            task_id: task_id.to_string(),
            status,
        };
        self.broadcast(task_id, &message).await
    }

    pub async fn broadcast_log(&self, task_id: &str, message: &str) -> usize {
        let message = WsMessage::Log {
            task_id: task_id.to_string(),
            message: message.to_string(),
        };
        self.broadcast(task_id, &message).await
    }

    pub async fn broadcast_error(&self, task_id: &str, error: &str) -> usize {
        let message = WsMessage::Error {
            task_id: task_id.to_string(),
            error: error.to_string(),
        };
        self.broadcast(task_id, &message).await
    }

    pub async fn broadcast_init(&self, task: &Task) -> usize {
        let message = WsMessage::Init {
            task_id: task.id.clone(),
            data: Box::new(task.clone()),
        };
        self.broadcast(&task.id, &message).await
    }

    pub async fn broadcast_complete(&self, task: &Task) -> usize {
        let message = WsMessage::Complete {
            task_id: task.id.clone(),
            data: Box::new(task.clone()),
        };
        self.broadcast(&task.id, &message).await
    }

    pub async fn connection_count(&self, task_id: &str) -> usize {
        self.registry
            .lock()
            .await
            .get(task_id)
            .map_or(0, Vec::len)
    }

    pub async fn all_connection_counts(&self) -> HashMap<String, usize> {
        self.registry
            .lock()
            .await
            .iter()
            .map(|(task_id, sockets)| (task_id.clone(), sockets.len()))
            .collect()
    }

    async fn send_to(&self, socket: &dyn TaskSocket, message: &WsMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode WebSocket message");
                return false;
            }
        };
        let ok = socket.send_text(text).await.is_ok();
        if ok {
            counter!("coding_agents_ws_messages_total", "type" => message.kind()).increment(1);
        }
        ok
    }
}

fn update_gauge(registry: &Registry) {
    let total: usize = registry.values().map(Vec::len).sum();
    gauge!("coding_agents_ws_connections").set(total as f64);
}
