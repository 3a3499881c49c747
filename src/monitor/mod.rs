//! Repository monitor: polls issue trackers and fans new issues out to
//! registered callbacks
//!
//! Each enabled repository gets one polling task. An issue number is
//! committed to the repository's processed set before any callback runs, so
//! every issue is handed out at most once for the lifetime of the
//! registration, even when a callback fails.

use crate::domain::{repo_key, MonitorStatus, MonitoredRepo, RepoSummary};
use crate::error::{AppError, Result};
use crate::github::Issue;
use crate::repository::MonitorRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use metrics::counter;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Where issues come from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssueSource: Send + Sync + 'static {
    async fn fetch_issues(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Issue>>;
}

/// Receives every newly detected issue together with the repository record
/// it was polled under (including that repository's credential)
#[async_trait]
pub trait IssueCallback: Send + Sync {
    async fn on_new_issue(&self, repo: &MonitoredRepo, issue: &Issue) -> Result<()>;
}

struct Shared<M, S> {
    repos: RwLock<HashMap<String, MonitoredRepo>>,
    callbacks: RwLock<Vec<Arc<dyn IssueCallback>>>,
    store: Arc<M>,
    source: Arc<S>,
    running: AtomicBool,
}

pub struct RepositoryMonitor<M: MonitorRepository, S: IssueSource> {
    shared: Arc<Shared<M, S>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<M: MonitorRepository, S: IssueSource> RepositoryMonitor<M, S> {
    pub fn new(store: Arc<M>, source: Arc<S>) -> Self {
        Self {
            shared: Arc::new(Shared {
                repos: RwLock::new(HashMap::new()),
                callbacks: RwLock::new(Vec::new()),
                store,
                source,
                running: AtomicBool::new(false),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn register_callback(&self, callback: Arc<dyn IssueCallback>) {
        self.shared.callbacks.write().await.push(callback);
    }

    /// Register (or re-register) a repository with an empty processed set.
    /// A running monitor picks it up on the next `start`.
    pub async fn add(
        &self,
        owner: &str,
        repo: &str,
        github_token: &str,
        poll_interval: u64,
    ) -> Result<MonitoredRepo> {
        let record = MonitoredRepo::new(owner, repo, github_token, poll_interval);
        self.shared.store.save(&record).await?;
        self.shared
            .repos
            .write()
            .await
            .insert(record.repo_key(), record.clone());
        tracing::info!(repo = %record.repo_key(), poll_interval, "Repository added to monitor");
        Ok(record)
    }

    /// Forget a repository. Its polling loop exits at the next cycle.
    pub async fn remove(&self, owner: &str, repo: &str) -> Result<bool> {
        let key = repo_key(owner, repo);
        let known = self.shared.repos.write().await.remove(&key).is_some();
        let persisted = self.shared.store.delete(owner, repo).await?;
        if known || persisted {
            tracing::info!(repo = %key, "Repository removed from monitor");
        }
        Ok(known || persisted)
    }

    pub async fn list(&self) -> Vec<RepoSummary> {
        let mut repos: Vec<RepoSummary> = self
            .shared
            .repos
            .read()
            .await
            .values()
            .map(MonitoredRepo::summary)
            .collect();
        repos.sort_by(|a, b| a.repo.cmp(&b.repo));
        repos
    }

    pub async fn status(&self) -> MonitorStatus {
        let repos = self.list().await;
        MonitorStatus {
            running: self.is_running(),
            repos_count: repos.len(),
            repos,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Load enabled repositories from the store; returns how many were loaded
    pub async fn load(&self) -> Result<usize> {
        let records = self.shared.store.load_all().await?;
        let mut repos = self.shared.repos.write().await;
        let mut loaded = 0;
        for mut record in records.into_iter().filter(|r| r.enabled) {
            if record.clamp_poll_interval() {
                tracing::warn!(
                    repo = %record.repo_key(),
                    poll_interval = record.poll_interval,
                    "Stored poll interval out of range, clamped"
                );
            }
            repos.insert(record.repo_key(), record);
            loaded += 1;
        }
        tracing::info!(loaded, "Monitored repositories loaded");
        Ok(loaded)
    }

    /// Spawn one polling loop per enabled repository. Returns `false` when
    /// already running.
    pub async fn start(&self) -> bool {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let keys: Vec<String> = self
            .shared
            .repos
            .read()
            .await
            .values()
            .filter(|r| r.enabled)
            .map(MonitoredRepo::repo_key)
            .collect();

        let mut handles = self.handles.lock().await;
        for key in keys {
            let shared = self.shared.clone();
            handles.push(tokio::spawn(async move { shared.poll_loop(key).await }));
        }
        tracing::info!(repos = handles.len(), "Repository monitor started");
        true
    }

    /// Cancel every polling loop and wait for it to finish
    pub async fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Monitor loop ended abnormally");
                }
            }
        }
        tracing::info!("Repository monitor stopped");
    }

    /// Run a single poll cycle for `owner/repo`; returns the number of new issues
    pub async fn poll_repo_once(&self, owner: &str, repo: &str) -> Result<usize> {
        self.shared.poll_once(&repo_key(owner, repo)).await
    }
}

impl<M: MonitorRepository, S: IssueSource> Shared<M, S> {
    async fn poll_loop(self: Arc<Self>, key: String) {
        tracing::debug!(repo = %key, "Polling loop started");
        while self.running.load(Ordering::SeqCst) {
            let interval = match self.repos.read().await.get(&key) {
                Some(repo) if repo.enabled => repo.poll_interval,
                _ => break,
            };
            if let Err(e) = self.poll_once(&key).await {
                tracing::warn!(repo = %key, error = %e, "Poll cycle failed, retrying next interval");
            }
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
        tracing::debug!(repo = %key, "Polling loop finished");
    }

    async fn poll_once(&self, key: &str) -> Result<usize> {
        let Some(snapshot) = self.repos.read().await.get(key).cloned() else {
            return Err(AppError::NotFound(format!("Repository {} is not monitored", key)));
        };

        let issues = match self
            .source
            .fetch_issues(
                &snapshot.owner,
                &snapshot.repo,
                &snapshot.github_token,
                Some(snapshot.last_checked),
            )
            .await
        {
            Ok(issues) => issues,
            Err(e) => {
                counter!("coding_agents_monitor_polls_total", "result" => "error").increment(1);
                return Err(e);
            }
        };
        counter!("coding_agents_monitor_polls_total", "result" => "ok").increment(1);

        let mut new_issues = 0;
        for issue in issues.iter().filter(|i| !i.is_pull_request()) {
            if !self.mark_processed(key, issue.number).await {
                continue;
            }
            new_issues += 1;
            counter!("coding_agents_monitor_new_issues_total").increment(1);
            tracing::info!(repo = %key, issue = issue.number, title = %issue.title, "New issue detected");
            self.notify(&snapshot, issue).await;
        }

        let record = {
            let mut repos = self.repos.write().await;
            match repos.get_mut(key) {
                Some(repo) => {
                    repo.last_checked = Utc::now();
                    Some(repo.clone())
                }
                None => None,
            }
        };
        if let Some(record) = record {
            if let Err(e) = self.store.save(&record).await {
                tracing::warn!(repo = %key, error = %e, "Failed to persist monitored repository");
            }
        }
        Ok(new_issues)
    }

    /// Commit an issue number; `false` when it was already processed or the
    /// repository is gone
    async fn mark_processed(&self, key: &str, number: u64) -> bool {
        self.repos
            .write()
            .await
            .get_mut(key)
            .is_some_and(|repo| repo.processed_issues.insert(number))
    }

    async fn notify(&self, repo: &MonitoredRepo, issue: &Issue) {
        let key = repo.repo_key();
        let callbacks = self.callbacks.read().await.clone();
        for callback in callbacks {
            let outcome = AssertUnwindSafe(callback.on_new_issue(repo, issue))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "callback panicked".to_string(),
            };
            counter!("coding_agents_monitor_callback_failures_total").increment(1);
            tracing::warn!(repo = %key, issue = issue.number, error = %failure, "Issue callback failed");
        }
    }
}
