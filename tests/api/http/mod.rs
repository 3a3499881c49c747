//! HTTP API handler tests infrastructure
//!
//! - `TestAppState` implements `HasServices` over `MemoryStore`
//! - the production `build_router()` is exercised through `oneshot`
//! - helpers for JSON requests (get_json, post_json, delete_json)

pub mod monitor_http_test;
pub mod stream_http_test;
pub mod task_http_test;
pub mod webhook_http_test;

use super::ScriptedIssues;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use coding_agents_core::config::{
    Config, GitHubConfig, MonitorConfig, RedisConfig, TaskConfig, TelemetryConfig,
};
use coding_agents_core::monitor::RepositoryMonitor;
use coding_agents_core::repository::{MonitorRepositoryImpl, TaskRepositoryImpl};
use coding_agents_core::runner::{TaskExecutor, WorkflowRunner};
use coding_agents_core::server::build_router;
use coding_agents_core::service::TaskService;
use coding_agents_core::state::HasServices;
use coding_agents_core::store::MemoryStore;
use coding_agents_core::ws::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

// ============================================================================
// Test Configuration
// ============================================================================

pub fn create_test_config() -> Config {
    Config {
        http_host: "127.0.0.1".to_string(),
        http_port: 8000,
        redis: RedisConfig {
            url: "redis://localhost:6379/0".to_string(),
        },
        tasks: TaskConfig {
            stream_poll_interval_ms: 10,
            ..TaskConfig::default()
        },
        github: GitHubConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            token: None,
            repo: None,
            webhook_secret: None,
            trigger_label: "agent-task".to_string(),
        },
        monitor: MonitorConfig::default(),
        telemetry: TelemetryConfig {
            metrics_enabled: false,
            log_format: "pretty".to_string(),
            tracing_enabled: false,
            otlp_endpoint: None,
            service_name: "coding-agents-core-test".to_string(),
        },
    }
}

// ============================================================================
// Test AppState
// ============================================================================

type TestTaskRepo = TaskRepositoryImpl<MemoryStore>;
type TestMonitorRepo = MonitorRepositoryImpl<MemoryStore>;

#[derive(Clone)]
pub struct TestAppState {
    pub config: Arc<Config>,
    pub store: MemoryStore,
    pub task_service: Arc<TaskService<TestTaskRepo>>,
    pub connections: Arc<ConnectionManager>,
    pub issues: Arc<ScriptedIssues>,
    pub monitor: Arc<RepositoryMonitor<TestMonitorRepo, ScriptedIssues>>,
    pub executor: Option<TaskExecutor<TestTaskRepo>>,
}

impl TestAppState {
    pub fn new() -> Self {
        Self::with_config(create_test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = MemoryStore::new();
        let shared = Arc::new(store.clone());
        let task_service = Arc::new(TaskService::new(Arc::new(TaskRepositoryImpl::new(
            shared.clone(),
            Duration::from_secs(config.tasks.ttl_secs),
        ))));
        let issues = Arc::new(ScriptedIssues::default());
        let monitor = Arc::new(RepositoryMonitor::new(
            Arc::new(MonitorRepositoryImpl::new(
                shared,
                Duration::from_secs(config.monitor.repo_ttl_secs),
            )),
            issues.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            task_service,
            connections: Arc::new(ConnectionManager::new()),
            issues,
            monitor,
            executor: None,
        }
    }

    /// Attach a background executor driven by `runner`
    pub fn with_runner(self, runner: impl WorkflowRunner) -> Self {
        self.with_shared_runner(Arc::new(runner))
    }

    /// Like [`Self::with_runner`], for runners the test keeps inspecting
    pub fn with_shared_runner(mut self, runner: Arc<dyn WorkflowRunner>) -> Self {
        self.executor = Some(TaskExecutor::new(
            self.task_service.clone(),
            self.connections.clone(),
            runner,
        ));
        self
    }
}

impl HasServices for TestAppState {
    type TaskRepo = TestTaskRepo;
    type MonitorRepo = TestMonitorRepo;
    type Issues = ScriptedIssues;

    fn config(&self) -> &Config {
        &self.config
    }

    fn task_service(&self) -> &Arc<TaskService<Self::TaskRepo>> {
        &self.task_service
    }

    fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    fn monitor(&self) -> &RepositoryMonitor<Self::MonitorRepo, Self::Issues> {
        &self.monitor
    }

    fn executor(&self) -> Option<&TaskExecutor<Self::TaskRepo>> {
        self.executor.as_ref()
    }

    async fn check_ready(&self) -> bool {
        self.task_service.ping().await
    }
}

pub fn build_test_router(state: TestAppState) -> Router {
    build_router(state)
}

// ============================================================================
// HTTP Helpers
// ============================================================================

async fn send<R: DeserializeOwned>(app: &Router, request: Request<Body>) -> (StatusCode, Option<R>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_default();

    if body_bytes.is_empty() {
        return (status, None);
    }

    match serde_json::from_slice(&body_bytes) {
        Ok(data) => (status, Some(data)),
        Err(_) => (status, None),
    }
}

pub async fn get_json<T: DeserializeOwned>(app: &Router, path: &str) -> (StatusCode, Option<T>) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json<T: Serialize, R: DeserializeOwned>(
    app: &Router,
    path: &str,
    body: &T,
) -> (StatusCode, Option<R>) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap();
    send(app, request).await
}

pub async fn post_empty<R: DeserializeOwned>(app: &Router, path: &str) -> (StatusCode, Option<R>) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn delete_json<R: DeserializeOwned>(app: &Router, path: &str) -> (StatusCode, Option<R>) {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

/// Raw body of a GET, read until the server closes the response
pub async fn get_text(app: &Router, path: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = tokio::time::timeout(
        Duration::from_secs(5),
        axum::body::to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("response did not finish in time")
    .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

/// `data` field of a `{ "data": ... }` envelope
pub fn data(body: &Option<Value>) -> &Value {
    &body.as_ref().expect("response body")["data"]
}
