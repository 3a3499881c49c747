//! GitHub REST client for the issue monitor

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::monitor::IssueSource;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const USER_AGENT_VALUE: &str = concat!("coding-agents-core/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueLabel {
    pub name: String,
}

/// An entry of `GET /repos/{owner}/{repo}/issues`. The endpoint also lists
/// pull requests, which carry a `pull_request` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub labels: Vec<IssueLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.name == label)
    }
}

/// GitHub API client
#[derive(Clone)]
pub struct GitHubClient {
    base_url: String,
    http_client: Client,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Open issues of a repository, newest first, optionally only those
    /// updated at or after `since`
    pub async fn list_open_issues(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Issue>> {
        let url = format!("{}/repos/{}/{}/issues", self.base_url, owner, repo);
        let mut query = vec![
            ("state", "open".to_string()),
            ("per_page", "100".to_string()),
            ("sort", "created".to_string()),
            ("direction", "desc".to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }

        let mut request = self
            .http_client
            .get(&url)
            .query(&query)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(ACCEPT, "application/vnd.github.v3+json");
        if !token.is_empty() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::GitHub(format!("Failed to list issues: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GitHub(format!(
                "Failed to list issues for {}/{}: {} - {}",
                owner, repo, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::GitHub(format!("Failed to parse issues response: {}", e)))
    }
}

#[async_trait]
impl IssueSource for GitHubClient {
    async fn fetch_issues(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Issue>> {
        self.list_open_issues(owner, repo, token, since).await
    }
}
