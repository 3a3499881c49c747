//! Monitored repository domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;
use validator::Validate;

pub const MIN_POLL_INTERVAL_SECS: u64 = 10;
pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;

fn default_poll_interval() -> u64 {
    60
}

fn default_enabled() -> bool {
    true
}

/// A repository polled for new issues.
///
/// `processed_issues` only grows; it is dropped together with the whole
/// record when the repository is removed.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredRepo {
    pub owner: String,
    pub repo: String,
    pub github_token: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    pub last_checked: DateTime<Utc>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub processed_issues: BTreeSet<u64>,
}

impl MonitoredRepo {
    pub fn new(owner: &str, repo: &str, github_token: &str, poll_interval: u64) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            github_token: github_token.to_string(),
            poll_interval,
            last_checked: Utc::now(),
            enabled: true,
            processed_issues: BTreeSet::new(),
        }
    }

    /// `owner/repo`
    pub fn repo_key(&self) -> String {
        repo_key(&self.owner, &self.repo)
    }

    /// Pull `poll_interval` back into the accepted range; `true` when it
    /// had to change
    pub fn clamp_poll_interval(&mut self) -> bool {
        let clamped = self
            .poll_interval
            .clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS);
        std::mem::replace(&mut self.poll_interval, clamped) != clamped
    }

    pub fn summary(&self) -> RepoSummary {
        RepoSummary {
            repo: self.repo_key(),
            enabled: self.enabled,
            poll_interval: self.poll_interval,
            last_checked: self.last_checked,
            processed_issues: self.processed_issues.len(),
        }
    }
}

// The credential never reaches logs.
impl std::fmt::Debug for MonitoredRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredRepo")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("github_token", &"<redacted>")
            .field("poll_interval", &self.poll_interval)
            .field("last_checked", &self.last_checked)
            .field("enabled", &self.enabled)
            .field("processed_issues", &self.processed_issues.len())
            .finish()
    }
}

pub fn repo_key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner, repo)
}

/// Request to start monitoring a repository
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddRepoInput {
    #[validate(length(min = 1, max = 100))]
    pub owner: String,
    #[validate(length(min = 1, max = 100))]
    pub repo: String,
    /// Falls back to the configured GITHUB_TOKEN when omitted
    #[validate(length(min = 1))]
    pub github_token: Option<String>,
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 10, max = 3600))]
    pub poll_interval: u64,
}

/// Public view of a monitored repository (no credential)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RepoSummary {
    pub repo: String,
    pub enabled: bool,
    pub poll_interval: u64,
    pub last_checked: DateTime<Utc>,
    pub processed_issues: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MonitorStatus {
    pub running: bool,
    pub repos_count: usize,
    pub repos: Vec<RepoSummary>,
}
