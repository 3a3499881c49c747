//! Task record domain model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use validator::Validate;

/// Which agent workflow a task drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    CodeAgent,
    Reviewer,
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "code-agent" => Ok(TaskType::CodeAgent),
            "reviewer" => Ok(TaskType::Reviewer),
            _ => Err(format!("Unknown task type: {}", s)),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::CodeAgent => write!(f, "code-agent"),
            TaskType::Reviewer => write!(f, "reviewer"),
        }
    }
}

/// Task lifecycle status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Reviewing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ACTIVE: [TaskStatus; 3] = [TaskStatus::Pending, TaskStatus::Running, TaskStatus::Reviewing];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Reviewing => "reviewing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "reviewing" => Ok(TaskStatus::Reviewing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_max_iterations() -> u32 {
    5
}

fn default_iteration() -> u32 {
    1
}

/// A tracked unit of agent work.
///
/// Every mutation goes through one of the helpers below so `updated_at`
/// always advances; the full-update stream relies on that to detect changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub status: TaskStatus,

    pub issue_number: Option<u64>,
    pub pr_number: Option<u64>,
    pub branch_name: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Repository override supplied at creation
    #[serde(default)]
    pub repo_url: Option<String>,

    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub current_step: String,
    #[serde(default = "default_iteration")]
    pub iteration: u32,

    #[serde(default)]
    pub logs: Vec<String>,
    /// path -> unified diff
    #[serde(default)]
    pub files_changed: BTreeMap<String, String>,
    #[schema(value_type = Option<Object>)]
    pub requirements: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub implementation_plan: Option<Value>,

    #[schema(value_type = Option<Object>)]
    pub result: Option<Value>,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a PENDING task from a creation request
    pub fn new(id: String, input: &CreateTaskInput) -> Self {
        let now = Utc::now();
        Self {
            id,
            task_type: input.task_type,
            status: TaskStatus::Pending,
            issue_number: input.issue_number,
            pr_number: input.pr_number,
            branch_name: input.branch_name.clone().or_else(|| {
                input
                    .issue_number
                    .map(|n| format!("agent/issue-{}", n))
            }),
            max_iterations: input.max_iterations,
            repo_url: input.repo_url.clone(),
            progress: 0.0,
            current_step: String::new(),
            iteration: 1,
            logs: Vec::new(),
            files_changed: BTreeMap::new(),
            requirements: None,
            implementation_plan: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds between start and completion, or start and now while running
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }

    /// Strictly advances `updated_at`, even for two writes in the same clock tick
    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }

    /// Append a `[HH:MM:SS] message` line
    pub fn add_log(&mut self, message: &str) {
        let stamp = Utc::now().format("%H:%M:%S");
        self.logs.push(format!("[{}] {}", stamp, message));
        self.touch();
    }

    pub fn update_progress(&mut self, progress: f64, step: Option<&str>, log: Option<&str>) {
        if !self.is_terminal() {
            self.progress = clamp_progress(progress);
        }
        if let Some(step) = step.filter(|s| !s.is_empty()) {
            self.current_step = step.to_string();
        }
        if let Some(log) = log.filter(|l| !l.is_empty()) {
            self.add_log(log);
        }
        self.touch();
    }

    pub fn mark_started(&mut self) {
        if self.set_status(TaskStatus::Running) {
            self.add_log("Task started");
        }
    }

    pub fn mark_completed(&mut self, result: Option<Value>) {
        if self.set_status(TaskStatus::Completed) {
            if result.is_some() {
                self.result = result;
            }
            self.add_log("Task completed");
        }
    }

    pub fn mark_failed(&mut self, error: &str) {
        if self.set_status(TaskStatus::Failed) {
            self.error = Some(error.to_string());
            self.add_log(&format!("Task failed: {}", error));
        }
    }

    pub fn mark_cancelled(&mut self) {
        if self.set_status(TaskStatus::Cancelled) {
            self.add_log("Task cancelled");
        }
    }

    /// Status transition with its side effects.
    ///
    /// Terminal statuses are sticky: once a task is completed, failed or
    /// cancelled its status, `completed_at` and progress no longer change.
    /// Returns whether the transition was applied.
    fn set_status(&mut self, status: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        match status {
            TaskStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            TaskStatus::Completed => {
                self.completed_at = Some(Utc::now());
                self.progress = 1.0;
            }
            TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Pending | TaskStatus::Reviewing => {}
        }
        self.touch();
        true
    }

    /// Apply a partial update; only supplied fields are touched
    pub fn apply(&mut self, update: TaskUpdate) {
        if let Some(progress) = update.progress {
            if !self.is_terminal() {
                self.progress = clamp_progress(progress);
            }
        }
        if let Some(step) = update.step.filter(|s| !s.is_empty()) {
            self.current_step = step;
        }
        if let Some(log) = update.log.filter(|l| !l.is_empty()) {
            self.add_log(&log);
        }
        if let Some(status) = update.status {
            if !self.set_status(status) && status != self.status {
                tracing::debug!(task_id = %self.id, %status, "ignoring transition out of terminal status");
            }
        }
        if update.result.is_some() {
            self.result = update.result;
        }
        if let Some(error) = update.error.filter(|e| !e.is_empty()) {
            self.error = Some(error);
        }
        self.touch();
    }

    pub fn set_files_changed(&mut self, files: BTreeMap<String, String>) {
        self.files_changed = files;
        self.touch();
    }

    /// Returns false when requirements were already recorded
    pub fn set_requirements(&mut self, requirements: Value) -> bool {
        if !set_once(&mut self.requirements, requirements) {
            return false;
        }
        self.touch();
        true
    }

    /// Returns false when a plan was already recorded
    pub fn set_implementation_plan(&mut self, plan: Value) -> bool {
        if !set_once(&mut self.implementation_plan, plan) {
            return false;
        }
        self.touch();
        true
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
        self.touch();
    }

    /// Last `limit` log lines in order
    pub fn log_tail(&self, limit: usize) -> &[String] {
        let start = self.logs.len().saturating_sub(limit);
        &self.logs[start..]
    }

    /// Input parameters for a fresh attempt of this task
    pub fn retry_input(&self) -> CreateTaskInput {
        CreateTaskInput {
            task_type: self.task_type,
            issue_number: self.issue_number,
            pr_number: self.pr_number,
            branch_name: self.branch_name.clone(),
            max_iterations: self.max_iterations,
            repo_url: self.repo_url.clone(),
            github_token: None,
        }
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        return 0.0;
    }
    progress.clamp(0.0, 1.0)
}

fn set_once(slot: &mut Option<Value>, value: Value) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    true
}

/// Create task request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateTaskInput {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[validate(range(min = 1))]
    pub issue_number: Option<u64>,
    #[validate(range(min = 1))]
    pub pr_number: Option<u64>,
    #[validate(length(min = 1, max = 255))]
    pub branch_name: Option<String>,
    #[serde(default = "default_max_iterations")]
    #[validate(range(min = 1, max = 10))]
    pub max_iterations: u32,
    #[validate(length(min = 1, max = 512))]
    pub repo_url: Option<String>,
    /// Used for this run only, never persisted
    #[serde(default, skip_serializing)]
    pub github_token: Option<String>,
}

impl CreateTaskInput {
    pub fn code_agent(issue_number: u64) -> Self {
        Self {
            task_type: TaskType::CodeAgent,
            issue_number: Some(issue_number),
            pr_number: None,
            branch_name: None,
            max_iterations: default_max_iterations(),
            repo_url: None,
            github_token: None,
        }
    }
}

/// Partial update applied by [`Task::apply`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub progress: Option<f64>,
    pub step: Option<String>,
    pub log: Option<String>,
    pub status: Option<TaskStatus>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: f64, step: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            step: Some(step.into()),
            ..Default::default()
        }
    }

    pub fn log(line: impl Into<String>) -> Self {
        Self {
            log: Some(line.into()),
            ..Default::default()
        }
    }
}

/// Aggregate counts over all stored tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub avg_duration_seconds: f64,
}

impl TaskStats {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut stats = TaskStats {
            total: tasks.len(),
            ..Default::default()
        };
        let mut durations = Vec::new();
        for task in tasks {
            *stats
                .by_status
                .entry(task.status.to_string())
                .or_insert(0) += 1;
            if task.is_active() {
                stats.active += 1;
            }
            match task.status {
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                _ => {}
            }
            if let Some(d) = task.duration_seconds() {
                durations.push(d);
            }
        }
        if !durations.is_empty() {
            stats.avg_duration_seconds = durations.iter().sum::<f64>() / durations.len() as f64;
        }
        stats
    }
}

/// Query parameters for listing tasks
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub active_only: bool,
}

fn default_log_limit() -> usize {
    100
}

/// Query parameters for the log tail endpoint
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

impl Default for LogsQuery {
    fn default() -> Self {
        Self {
            limit: default_log_limit(),
        }
    }
}
