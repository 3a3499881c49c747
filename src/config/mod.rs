//! Configuration management for the coding agents core

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Upper bound for `TASK_RETENTION_HOURS` (100 years)
pub const MAX_RETENTION_HOURS: u64 = 100 * 365 * 24;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server host
    pub http_host: String,
    /// HTTP server port
    pub http_port: u16,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Task lifecycle and streaming configuration
    pub tasks: TaskConfig,
    /// GitHub configuration
    pub github: GitHubConfig,
    /// Repository monitor configuration
    pub monitor: MonitorConfig,
    /// Logging, metrics and tracing configuration
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Sliding TTL applied to `task:<id>` on every write
    pub ttl_secs: u64,
    /// Terminal tasks older than this are removed by the cleanup sweep
    pub retention_hours: u64,
    /// Cleanup sweep cadence; 0 disables the sweeper
    pub cleanup_interval_secs: u64,
    /// SSE diff-poll cadence
    pub stream_poll_interval_ms: u64,
    /// Optional cap on the lifetime of a single SSE stream
    pub stream_max_duration_secs: Option<u64>,
    /// How long shutdown waits for in-flight workflow runs
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub base_url: String,
    pub token: Option<String>,
    /// Default repository as `owner/name`
    pub repo: Option<String>,
    /// Shared secret for `X-Hub-Signature-256` verification
    pub webhook_secret: Option<String>,
    /// Issue label that marks an issue for the code agent
    pub trigger_label: String,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub repo_ttl_secs: u64,
    pub autostart: bool,
    /// Create a code-agent task for every newly detected issue
    pub create_tasks: bool,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub metrics_enabled: bool,
    /// "json" or "pretty"
    pub log_format: String,
    pub tracing_enabled: bool,
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("Invalid HTTP_PORT")?,
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379/0".to_string()),
            },
            tasks: TaskConfig {
                ttl_secs: parse_or("TASK_TTL_SECS", 86400),
                retention_hours: parse_or("TASK_RETENTION_HOURS", 24),
                cleanup_interval_secs: parse_or("TASK_CLEANUP_INTERVAL_SECS", 3600),
                stream_poll_interval_ms: parse_or("SSE_POLL_INTERVAL_MS", 500),
                stream_max_duration_secs: env::var("SSE_MAX_DURATION_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|secs| *secs > 0),
                shutdown_grace_secs: parse_or("TASK_SHUTDOWN_GRACE_SECS", 30),
            },
            github: GitHubConfig {
                base_url: env::var("GITHUB_BASE_URL")
                    .unwrap_or_else(|_| "https://api.github.com".to_string()),
                token: non_empty("GITHUB_TOKEN"),
                repo: non_empty("GITHUB_REPO"),
                webhook_secret: non_empty("GITHUB_WEBHOOK_SECRET"),
                trigger_label: env::var("WEBHOOK_TRIGGER_LABEL")
                    .unwrap_or_else(|_| "agent-task".to_string()),
            },
            monitor: MonitorConfig {
                repo_ttl_secs: parse_or("MONITOR_REPO_TTL_SECS", 30 * 24 * 3600),
                autostart: parse_bool("MONITOR_AUTOSTART", false),
                create_tasks: parse_bool("MONITOR_CREATE_TASKS", true),
            },
            telemetry: TelemetryConfig {
                metrics_enabled: parse_bool("METRICS_ENABLED", true),
                log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
                tracing_enabled: parse_bool("OTEL_TRACING_ENABLED", false),
                otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT"),
                service_name: env::var("OTEL_SERVICE_NAME")
                    .unwrap_or_else(|_| "coding-agents-core".to_string()),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break background maintenance
    pub fn validate(&self) -> Result<()> {
        if self.tasks.retention().is_none() {
            bail!(
                "Invalid TASK_RETENTION_HOURS: {} (maximum {})",
                self.tasks.retention_hours,
                MAX_RETENTION_HOURS
            );
        }
        Ok(())
    }

    /// Get HTTP server address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

impl TaskConfig {
    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_interval_ms.max(10))
    }

    pub fn stream_max_duration(&self) -> Option<Duration> {
        self.stream_max_duration_secs.map(Duration::from_secs)
    }

    /// Retention window as a signed duration; `None` when out of range
    pub fn retention(&self) -> Option<chrono::Duration> {
        if self.retention_hours > MAX_RETENTION_HOURS {
            return None;
        }
        i64::try_from(self.retention_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 86400,
            retention_hours: 24,
            cleanup_interval_secs: 3600,
            stream_poll_interval_ms: 500,
            stream_max_duration_secs: None,
            shutdown_grace_secs: 30,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            repo_ttl_secs: 30 * 24 * 3600,
            autostart: false,
            create_tasks: true,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
