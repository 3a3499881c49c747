//! Turns newly detected issues into code-agent tasks

use super::TaskExecutor;
use crate::domain::{CreateTaskInput, MonitoredRepo};
use crate::error::Result;
use crate::github::Issue;
use crate::monitor::IssueCallback;
use crate::repository::TaskRepository;
use crate::service::TaskService;
use async_trait::async_trait;
use std::sync::Arc;

/// Monitor callback creating one task per new issue, handed to the executor
/// when one is configured.
///
/// The run gets the credential the repository was registered with;
/// `fallback_token` only applies when that credential is empty.
pub struct IssueTaskCallback<R: TaskRepository> {
    tasks: Arc<TaskService<R>>,
    executor: Option<TaskExecutor<R>>,
    fallback_token: Option<String>,
}

impl<R: TaskRepository> IssueTaskCallback<R> {
    pub fn new(
        tasks: Arc<TaskService<R>>,
        executor: Option<TaskExecutor<R>>,
        fallback_token: Option<String>,
    ) -> Self {
        Self {
            tasks,
            executor,
            fallback_token,
        }
    }

    fn token_for(&self, repo: &MonitoredRepo) -> Option<String> {
        Some(repo.github_token.clone())
            .filter(|token| !token.is_empty())
            .or_else(|| self.fallback_token.clone())
    }
}

#[async_trait]
impl<R: TaskRepository> IssueCallback for IssueTaskCallback<R> {
    async fn on_new_issue(&self, repo: &MonitoredRepo, issue: &Issue) -> Result<()> {
        let repo_key = repo.repo_key();
        let input = CreateTaskInput {
            repo_url: Some(format!("https://github.com/{}", repo_key)),
            ..CreateTaskInput::code_agent(issue.number)
        };
        let task = self.tasks.create(input).await?;
        self.tasks
            .add_log(
                &task.id,
                &format!("Created from issue #{} in {}: {}", issue.number, repo_key, issue.title),
            )
            .await?;
        tracing::info!(task_id = %task.id, repo = %repo_key, issue = issue.number, "Task created for new issue");

        if let Some(executor) = &self.executor {
            executor.spawn(&task, self.token_for(repo)).await;
        }
        Ok(())
    }
}
