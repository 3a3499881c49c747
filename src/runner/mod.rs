//! Workflow runner boundary
//!
//! The agent workflow itself lives outside this crate. A [`WorkflowRunner`]
//! receives the task parameters plus a [`ProgressReporter`]; everything the
//! runner reports is written through the task manager and then pushed to the
//! task's WebSocket subscribers.

mod intake;

pub use intake::IssueTaskCallback;

use crate::domain::{Task, TaskStatus, TaskType};
use crate::repository::TaskRepository;
use crate::service::TaskService;
use crate::ws::ConnectionManager;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Error recorded on tasks whose run was cut short by shutdown
pub const INTERRUPTED_ERROR: &str = "Interrupted by shutdown";

/// Input handed to a runner
#[derive(Clone)]
pub struct WorkflowRequest {
    pub task_id: String,
    pub task_type: TaskType,
    pub issue_number: Option<u64>,
    pub pr_number: Option<u64>,
    pub branch_name: Option<String>,
    pub max_iterations: u32,
    pub repo_url: Option<String>,
    pub github_token: Option<String>,
}

impl WorkflowRequest {
    pub fn from_task(task: &Task, github_token: Option<String>) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.task_type,
            issue_number: task.issue_number,
            pr_number: task.pr_number,
            branch_name: task.branch_name.clone(),
            max_iterations: task.max_iterations,
            repo_url: task.repo_url.clone(),
            github_token,
        }
    }
}

impl std::fmt::Debug for WorkflowRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRequest")
            .field("task_id", &self.task_id)
            .field("task_type", &self.task_type)
            .field("issue_number", &self.issue_number)
            .field("pr_number", &self.pr_number)
            .field("branch_name", &self.branch_name)
            .field("max_iterations", &self.max_iterations)
            .field("repo_url", &self.repo_url)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Callbacks available to a running workflow. Failures are absorbed by the
/// reporter; a runner never sees them.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn progress(&self, progress: f64, step: &str, log: Option<&str>);
    async fn log(&self, message: &str);
    async fn status(&self, status: TaskStatus);
    async fn files_changed(&self, files: BTreeMap<String, String>);
    async fn requirements(&self, requirements: Value);
    async fn implementation_plan(&self, plan: Value);
    async fn iteration(&self, iteration: u32);
}

#[async_trait]
pub trait WorkflowRunner: Send + Sync + 'static {
    /// Run to completion; `Err` carries the failure text recorded on the task
    async fn run(
        &self,
        request: WorkflowRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Value, String>;
}

/// [`ProgressReporter`] bound to one task
pub struct TaskReporter<R: TaskRepository> {
    task_id: String,
    tasks: Arc<TaskService<R>>,
    connections: Arc<ConnectionManager>,
}

impl<R: TaskRepository> TaskReporter<R> {
    pub fn new(
        task_id: impl Into<String>,
        tasks: Arc<TaskService<R>>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            tasks,
            connections,
        }
    }

    /// Logs and swallows store failures; `true` when the task still exists
    fn written(&self, what: &str, result: crate::error::Result<Option<Task>>) -> bool {
        match result {
            Ok(Some(_)) => true,
            Ok(None) => {
                tracing::warn!(task_id = %self.task_id, what, "Runner reported on a missing task");
                false
            }
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, what, error = %e, "Failed to record runner report");
                false
            }
        }
    }
}

#[async_trait]
impl<R: TaskRepository> ProgressReporter for TaskReporter<R> {
    async fn progress(&self, progress: f64, step: &str, log: Option<&str>) {
        let result = self
            .tasks
            .update_progress(&self.task_id, progress, Some(step), log)
            .await;
        if let Some(task) = result.as_ref().ok().and_then(Option::as_ref) {
            self.connections
                .broadcast_progress(&self.task_id, task.progress, step, log)
                .await;
        }
        self.written("progress", result);
    }

    async fn log(&self, message: &str) {
        let result = self.tasks.add_log(&self.task_id, message).await;
        if self.written("log", result) {
            self.connections.broadcast_log(&self.task_id, message).await;
        }
    }

    async fn status(&self, status: TaskStatus) {
        let result = self
            .tasks
            .update(&self.task_id, crate::domain::TaskUpdate::status(status))
            .await;
        if let Some(task) = result.as_ref().ok().and_then(Option::as_ref) {
            self.connections
                .broadcast_status(&self.task_id, task.status)
                .await;
        }
        self.written("status", result);
    }

    async fn files_changed(&self, files: BTreeMap<String, String>) {
        let result = self.tasks.set_files_changed(&self.task_id, files).await;
        self.written("files_changed", result);
    }

    async fn requirements(&self, requirements: Value) {
        let result = self.tasks.set_requirements(&self.task_id, requirements).await;
        self.written("requirements", result);
    }

    async fn implementation_plan(&self, plan: Value) {
        let result = self.tasks.set_implementation_plan(&self.task_id, plan).await;
        self.written("implementation_plan", result);
    }

    async fn iteration(&self, iteration: u32) {
        let result = self.tasks.set_iteration(&self.task_id, iteration).await;
        self.written("iteration", result);
    }
}

/// Background runs owned by an executor. Each run yields its task id.
#[derive(Default)]
struct Runs {
    set: JoinSet<String>,
    in_flight: HashSet<String>,
}

impl Runs {
    fn reap(&mut self) {
        while let Some(joined) = self.set.try_join_next() {
            if let Ok(task_id) = joined {
                self.in_flight.remove(&task_id);
            }
        }
    }
}

/// Runs workflows in the background and records their outcome
pub struct TaskExecutor<R: TaskRepository> {
    tasks: Arc<TaskService<R>>,
    connections: Arc<ConnectionManager>,
    runner: Arc<dyn WorkflowRunner>,
    runs: Arc<Mutex<Runs>>,
}

impl<R: TaskRepository> Clone for TaskExecutor<R> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
            connections: self.connections.clone(),
            runner: self.runner.clone(),
            runs: self.runs.clone(),
        }
    }
}

impl<R: TaskRepository> TaskExecutor<R> {
    pub fn new(
        tasks: Arc<TaskService<R>>,
        connections: Arc<ConnectionManager>,
        runner: Arc<dyn WorkflowRunner>,
    ) -> Self {
        Self {
            tasks,
            connections,
            runner,
            runs: Arc::new(Mutex::new(Runs::default())),
        }
    }

    /// Start a run for `task` in the background
    pub async fn spawn(&self, task: &Task, github_token: Option<String>) {
        let executor = self.clone();
        let request = WorkflowRequest::from_task(task, github_token);
        let task_id = task.id.clone();

        let mut runs = self.runs.lock().await;
        runs.reap();
        runs.in_flight.insert(task_id.clone());
        runs.set.spawn(async move {
            executor.execute(request).await;
            task_id
        });
    }

    /// Number of runs that have not finished yet
    pub async fn in_flight(&self) -> usize {
        let mut runs = self.runs.lock().await;
        runs.reap();
        runs.in_flight.len()
    }

    /// Wait up to `grace` for in-flight runs, then abort the rest and mark
    /// their tasks failed. Returns how many tasks were interrupted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let interrupted: Vec<String> = {
            let mut guard = self.runs.lock().await;
            let runs = &mut *guard;
            let drained = tokio::time::timeout(grace, async {
                while let Some(joined) = runs.set.join_next().await {
                    if let Ok(task_id) = joined {
                        runs.in_flight.remove(&task_id);
                    }
                }
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    remaining = runs.in_flight.len(),
                    "Workflow runs still active after grace period, aborting"
                );
            }
            runs.set.shutdown().await;
            runs.in_flight.drain().collect()
        };

        let mut count = 0;
        for task_id in interrupted {
            match self.tasks.get(&task_id).await {
                Ok(Some(task)) if task.is_active() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Could not read interrupted task");
                    continue;
                }
            }
            match self.tasks.mark_failed(&task_id, INTERRUPTED_ERROR).await {
                Ok(Some(task)) => {
                    count += 1;
                    self.connections.broadcast_error(&task_id, INTERRUPTED_ERROR).await;
                    self.connections.broadcast_status(&task_id, task.status).await;
                    self.connections.broadcast_complete(&task).await;
                }
                Ok(None) => {}
                Err(e) => tracing::error!(task_id = %task_id, error = %e, "Failed to record interruption"),
            }
        }
        if count > 0 {
            tracing::info!(interrupted = count, "Workflow runs interrupted by shutdown");
        }
        count
    }

    /// Mark RUNNING, run the workflow, record COMPLETED or FAILED and push
    /// the outcome
    pub async fn execute(&self, request: WorkflowRequest) {
        let task_id = request.task_id.clone();
        match self.tasks.mark_started(&task_id).await {
            Ok(Some(task)) if task.status == TaskStatus::Running => {
                self.connections
                    .broadcast_status(&task_id, TaskStatus::Running)
                    .await;
            }
            Ok(Some(task)) => {
                tracing::info!(task_id = %task_id, status = %task.status, "Task no longer runnable, skipping");
                return;
            }
            Ok(None) => {
                tracing::warn!(task_id = %task_id, "Task vanished before it could start");
                return;
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to start task");
                return;
            }
        }

        tracing::info!(task_id = %task_id, task_type = %request.task_type, "Workflow started");
        let reporter: Arc<dyn ProgressReporter> = Arc::new(TaskReporter::new(
            task_id.clone(),
            self.tasks.clone(),
            self.connections.clone(),
        ));
        let outcome = self.runner.run(request, reporter).await;

        let recorded = match &outcome {
            Ok(result) => {
                tracing::info!(task_id = %task_id, "Workflow completed");
                self.tasks.mark_completed(&task_id, Some(result.clone())).await
            }
            Err(error) => {
                tracing::warn!(task_id = %task_id, error = %error, "Workflow failed");
                self.connections.broadcast_error(&task_id, error).await;
                self.tasks.mark_failed(&task_id, error).await
            }
        };

        match recorded {
            Ok(Some(task)) => {
                self.connections.broadcast_status(&task_id, task.status).await;
                self.connections.broadcast_complete(&task).await;
            }
            Ok(None) => tracing::warn!(task_id = %task_id, "Task vanished before its outcome was recorded"),
            Err(e) => tracing::error!(task_id = %task_id, error = %e, "Failed to record workflow outcome"),
        }
    }
}
