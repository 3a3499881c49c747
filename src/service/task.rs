//! Task manager: the only writer of task records

use crate::domain::{CreateTaskInput, Task, TaskListQuery, TaskStats, TaskStatus, TaskUpdate};
use crate::error::{AppError, Result};
use crate::repository::TaskRepository;
use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use validator::Validate;

/// Owns create/update/cancel/retry/cleanup over a [`TaskRepository`].
///
/// Every mutation is a read-modify-write of the whole record followed by a
/// TTL-resetting save. Writers inside this process are serialized by
/// `write_lock`; separate processes sharing the store still race and the
/// last writer wins.
pub struct TaskService<R: TaskRepository> {
    repo: Arc<R>,
    write_lock: Mutex<()>,
}

impl<R: TaskRepository> TaskService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a PENDING task and register it in the index
    pub async fn create(&self, input: CreateTaskInput) -> Result<Task> {
        input.validate()?;

        let task = Task::new(Uuid::new_v4().to_string(), &input);
        self.repo.save(&task).await?;
        self.repo.add_to_index(&task.id).await?;

        counter!("coding_agents_tasks_created_total", "type" => task.task_type.to_string())
            .increment(1);
        tracing::info!(task_id = %task.id, task_type = %task.task_type, "Task created");
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Task>> {
        self.repo.find_by_id(id).await
    }

    /// All indexed tasks, newest first; ids whose record expired are skipped
    pub async fn get_all(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for id in self.repo.list_ids().await? {
            match self.repo.find_by_id(&id).await {
                Ok(Some(task)) if status.map_or(true, |s| task.status == s) => tasks.push(task),
                Ok(_) => {}
                Err(AppError::Serialization(e)) => {
                    tracing::warn!(task_id = %id, error = %e, "Skipping undecodable task record");
                }
                Err(e) => return Err(e),
            }
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    /// PENDING, RUNNING and REVIEWING tasks, newest first
    pub async fn list_active(&self) -> Result<Vec<Task>> {
        let mut tasks = self.get_all(None).await?;
        tasks.retain(Task::is_active);
        Ok(tasks)
    }

    pub async fn list(&self, query: &TaskListQuery) -> Result<Vec<Task>> {
        if query.active_only {
            let mut tasks = self.list_active().await?;
            if let Some(status) = query.status {
                tasks.retain(|t| t.status == status);
            }
            return Ok(tasks);
        }
        self.get_all(query.status).await
    }

    /// Partial update; `None` when the task no longer exists
    pub async fn update(&self, id: &str, update: TaskUpdate) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            task.apply(update);
            true
        })
        .await
    }

    pub async fn add_log(&self, id: &str, message: &str) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            task.add_log(message);
            true
        })
        .await
    }

    pub async fn update_progress(
        &self,
        id: &str,
        progress: f64,
        step: Option<&str>,
        log: Option<&str>,
    ) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            task.update_progress(progress, step, log);
            true
        })
        .await
    }

    pub async fn mark_started(&self, id: &str) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            task.mark_started();
            true
        })
        .await
    }

    pub async fn mark_completed(&self, id: &str, result: Option<Value>) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            task.mark_completed(result);
            true
        })
        .await
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            task.mark_failed(error);
            true
        })
        .await
    }

    pub async fn set_files_changed(
        &self,
        id: &str,
        files: BTreeMap<String, String>,
    ) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            task.set_files_changed(files);
            true
        })
        .await
    }

    /// Records requirements once; later calls leave the record untouched
    pub async fn set_requirements(&self, id: &str, requirements: Value) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            let set = task.set_requirements(requirements);
            if !set {
                tracing::warn!(task_id = %task.id, "Requirements already recorded, ignoring");
            }
            set
        })
        .await
    }

    /// Records the implementation plan once
    pub async fn set_implementation_plan(&self, id: &str, plan: Value) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            let set = task.set_implementation_plan(plan);
            if !set {
                tracing::warn!(task_id = %task.id, "Implementation plan already recorded, ignoring");
            }
            set
        })
        .await
    }

    pub async fn set_iteration(&self, id: &str, iteration: u32) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            task.set_iteration(iteration);
            true
        })
        .await
    }

    /// Cancel an active task; terminal tasks are returned unchanged
    pub async fn cancel(&self, id: &str) -> Result<Option<Task>> {
        self.mutate(id, |task| {
            if !task.is_active() {
                return false;
            }
            task.mark_cancelled();
            true
        })
        .await
    }

    /// Start a fresh task from the input parameters of a finished one
    pub async fn retry(&self, id: &str) -> Result<Option<Task>> {
        let Some(original) = self.repo.find_by_id(id).await? else {
            return Ok(None);
        };
        if original.is_active() {
            return Err(AppError::Conflict(format!(
                "Task {} is still {}",
                id, original.status
            )));
        }

        let task = self.create(original.retry_input()).await?;
        let retried = self
            .add_log(&task.id, &format!("Retried from task {}", id))
            .await?;
        tracing::info!(task_id = %task.id, retried_from = %id, "Task retried");
        Ok(Some(retried.unwrap_or(task)))
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.repo.delete(id).await
    }

    /// Remove terminal tasks completed before `now - max_age`.
    ///
    /// Index entries whose record already expired are pruned as well but are
    /// not counted.
    pub async fn cleanup_old_tasks(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;
        for id in self.repo.list_ids().await? {
            let task = match self.repo.find_by_id(&id).await {
                Ok(task) => task,
                Err(e) => {
                    tracing::warn!(task_id = %id, error = %e, "Cleanup could not read task");
                    continue;
                }
            };
            match task {
                None => {
                    let _guard = self.write_lock.lock().await;
                    self.repo.remove_from_index(&id).await?;
                }
                Some(task)
                    if task.is_terminal() && task.completed_at.is_some_and(|at| at < cutoff) =>
                {
                    let _guard = self.write_lock.lock().await;
                    if self.repo.delete(&id).await? {
                        removed += 1;
                    }
                }
                Some(_) => {}
            }
        }
        if removed > 0 {
            counter!("coding_agents_tasks_cleaned_total").increment(removed as u64);
            tracing::info!(removed, "Old tasks cleaned up");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<TaskStats> {
        let tasks = self.get_all(None).await?;
        Ok(TaskStats::from_tasks(&tasks))
    }

    /// Last `limit` log lines
    pub async fn logs(&self, id: &str, limit: usize) -> Result<Option<Vec<String>>> {
        Ok(self
            .repo
            .find_by_id(id)
            .await?
            .map(|task| task.log_tail(limit).to_vec()))
    }

    pub async fn diff(&self, id: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.repo.find_by_id(id).await?.map(|task| task.files_changed))
    }

    pub async fn ping(&self) -> bool {
        self.repo.ping().await
    }

    /// Read-modify-write under the write lock. `apply` returns whether the
    /// record changed; unchanged records are not written back.
    async fn mutate<F>(&self, id: &str, apply: F) -> Result<Option<Task>>
    where
        F: FnOnce(&mut Task) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let Some(mut task) = self.repo.find_by_id(id).await? else {
            return Ok(None);
        };
        let before = task.status;
        if apply(&mut task) {
            self.repo.save(&task).await?;
            if task.status != before {
                counter!("coding_agents_task_transitions_total", "status" => task.status.to_string())
                    .increment(1);
                tracing::debug!(task_id = %id, from = %before, to = %task.status, "Task status changed");
            }
        }
        Ok(Some(task))
    }
}
