//! Inbound GitHub webhook classification

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Which workflow an inbound event would start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WebhookOutcome {
    /// "triggered" or "received"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl WebhookOutcome {
    /// Classify a payload: a labelled issue wins over a pull request event
    pub fn classify(payload: &Value, trigger_label: &str) -> Self {
        if let Some(issue) = payload.get("issue") {
            let labelled = issue
                .get("labels")
                .and_then(Value::as_array)
                .is_some_and(|labels| {
                    labels
                        .iter()
                        .filter_map(|l| l.get("name").and_then(Value::as_str))
                        .any(|name| name == trigger_label)
                });
            if let (true, Some(number)) = (labelled, issue.get("number").and_then(Value::as_u64)) {
                return Self::triggered("code-agent").with_issue(number);
            }
        }

        if let Some(number) = payload
            .get("pull_request")
            .and_then(|pr| pr.get("number"))
            .and_then(Value::as_u64)
        {
            return Self::triggered("reviewer-agent").with_pr(number);
        }

        Self {
            status: "received".to_string(),
            agent: None,
            issue: None,
            pr: None,
            event: Some(
                payload
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            ),
        }
    }

    fn triggered(agent: &str) -> Self {
        Self {
            status: "triggered".to_string(),
            agent: Some(agent.to_string()),
            issue: None,
            pr: None,
            event: None,
        }
    }

    fn with_issue(mut self, number: u64) -> Self {
        self.issue = Some(number);
        self
    }

    fn with_pr(mut self, number: u64) -> Self {
        self.pr = Some(number);
        self
    }
}
