//! Server-sent event streams over task records
//!
//! Both streams diff-poll the task store on a fixed cadence until the task
//! leaves the active set. They are plain [`Stream`]s of [`StreamEvent`]; the
//! HTTP layer only maps them into SSE frames, and dropping the stream (peer
//! disconnect) ends the polling.
//!
//! - log stream: backlog as `log` events, then per cycle new `log` lines and
//!   an unconditional `status`, finally one `done`
//! - update stream: one `init` snapshot, an `update` whenever `updated_at`
//!   advanced, finally one `complete`
//!
//! A task that is missing at connect time, or disappears mid-stream, yields a
//! single `error` event and the stream ends.

use crate::domain::{Task, TaskStatus};
use crate::repository::TaskRepository;
use crate::service::TaskService;
use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use metrics::counter;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Polling knobs shared by both stream variants
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub poll_interval: Duration,
    /// Ends the stream with an `error` event once exceeded
    pub max_duration: Option<Duration>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_duration: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Log {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Status {
        status: TaskStatus,
        progress: f64,
        step: String,
    },
    Done {
        status: TaskStatus,
        progress: f64,
        result: Option<Value>,
        error: Option<String>,
    },
    Init(Box<Task>),
    Update(Box<Task>),
    Complete(Box<Task>),
    Error {
        error: String,
    },
}

impl StreamEvent {
    /// SSE `event:` name
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Log { .. } => "log",
            StreamEvent::Status { .. } => "status",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Init(_) => "init",
            StreamEvent::Update(_) => "update",
            StreamEvent::Complete(_) => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Done { .. } | StreamEvent::Complete(_) | StreamEvent::Error { .. }
        )
    }

    pub fn into_event(self) -> Event {
        let data = serde_json::to_string(&self).unwrap_or_else(|e| {
            json!({ "error": format!("failed to encode event: {}", e) }).to_string()
        });
        Event::default().event(self.name()).data(data)
    }

    fn log(message: &str) -> Self {
        StreamEvent::Log {
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn status(task: &Task) -> Self {
        StreamEvent::Status {
            status: task.status,
            progress: task.progress,
            step: task.current_step.clone(),
        }
    }

    fn done(task: &Task) -> Self {
        StreamEvent::Done {
            status: task.status,
            progress: task.progress,
            result: task.result.clone(),
            error: task.error.clone(),
        }
    }

    fn error(message: String) -> Self {
        StreamEvent::Error { error: message }
    }
}

/// Outcome of one poll cycle
enum Poll {
    Task(Task),
    Gone,
    Expired,
}

struct Poller<R: TaskRepository> {
    tasks: Arc<TaskService<R>>,
    task_id: String,
    settings: StreamSettings,
    deadline: Option<Instant>,
}

impl<R: TaskRepository> Poller<R> {
    fn new(tasks: Arc<TaskService<R>>, task_id: String, settings: StreamSettings) -> Self {
        let deadline = settings.max_duration.map(|d| Instant::now() + d);
        Self {
            tasks,
            task_id,
            settings,
            deadline,
        }
    }

    async fn initial(&self) -> Result<Task, StreamEvent> {
        match self.tasks.get(&self.task_id).await {
            Ok(Some(task)) => Ok(task),
            Ok(None) => Err(StreamEvent::error(format!("Task {} not found", self.task_id))),
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, error = %e, "Stream could not load task");
                Err(StreamEvent::error(format!(
                    "Task {} could not be loaded",
                    self.task_id
                )))
            }
        }
    }

    /// Sleeps one interval and re-reads the record. Store errors are logged
    /// and the cycle is retried.
    async fn next(&self) -> Poll {
        loop {
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                return Poll::Expired;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
            match self.tasks.get(&self.task_id).await {
                Ok(Some(task)) => return Poll::Task(task),
                Ok(None) => return Poll::Gone,
                Err(e) => {
                    tracing::warn!(task_id = %self.task_id, error = %e, "Stream poll failed, retrying");
                }
            }
        }
    }

    fn gone(&self) -> StreamEvent {
        StreamEvent::error(format!("Task {} disappeared", self.task_id))
    }

    fn expired(&self) -> StreamEvent {
        StreamEvent::error(format!(
            "Stream for task {} exceeded its maximum duration",
            self.task_id
        ))
    }
}

/// Log lines plus periodic status, ending with `done`
pub fn log_stream<R: TaskRepository>(
    tasks: Arc<TaskService<R>>,
    task_id: String,
    settings: StreamSettings,
) -> BoxStream<'static, StreamEvent> {
    counter!("coding_agents_sse_streams_total", "kind" => "logs").increment(1);
    Box::pin(async_stream::stream! {
        let poller = Poller::new(tasks, task_id, settings);
        let mut task = match poller.initial().await {
            Ok(task) => task,
            Err(event) => {
                yield event;
                return;
            }
        };

        for line in &task.logs {
            yield StreamEvent::log(line);
        }
        let mut seen = task.logs.len();

        while task.is_active() {
            task = match poller.next().await {
                Poll::Task(task) => task,
                Poll::Gone => {
                    yield poller.gone();
                    return;
                }
                Poll::Expired => {
                    yield poller.expired();
                    return;
                }
            };
            for line in task.logs.iter().skip(seen) {
                yield StreamEvent::log(line);
            }
            seen = seen.max(task.logs.len());
            yield StreamEvent::status(&task);
        }

        yield StreamEvent::done(&task);
    })
}

/// Full-record snapshots on change, ending with `complete`
pub fn update_stream<R: TaskRepository>(
    tasks: Arc<TaskService<R>>,
    task_id: String,
    settings: StreamSettings,
) -> BoxStream<'static, StreamEvent> {
    counter!("coding_agents_sse_streams_total", "kind" => "updates").increment(1);
    Box::pin(async_stream::stream! {
        let poller = Poller::new(tasks, task_id, settings);
        let mut task = match poller.initial().await {
            Ok(task) => task,
            Err(event) => {
                yield event;
                return;
            }
        };

        let mut last_updated = task.updated_at;
        yield StreamEvent::Init(Box::new(task.clone()));

        while task.is_active() {
            task = match poller.next().await {
                Poll::Task(task) => task,
                Poll::Gone => {
                    yield poller.gone();
                    return;
                }
                Poll::Expired => {
                    yield poller.expired();
                    return;
                }
            };
            if task.updated_at > last_updated {
                last_updated = task.updated_at;
                yield StreamEvent::Update(Box::new(task.clone()));
            }
        }

        yield StreamEvent::Complete(Box::new(task));
    })
}
