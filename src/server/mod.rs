//! Server initialization and routing

use crate::api;
use crate::config::{Config, TaskConfig};
use crate::github::GitHubClient;
use crate::middleware::{ObservabilityLayer, SanitizedMakeSpan};
use crate::monitor::RepositoryMonitor;
use crate::openapi::ApiDoc;
use crate::repository::{MonitorRepositoryImpl, TaskRepository, TaskRepositoryImpl};
use crate::runner::{IssueTaskCallback, TaskExecutor, WorkflowRunner};
use crate::service::TaskService;
use crate::state::HasServices;
use crate::store::RedisStore;
use crate::ws::ConnectionManager;
use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Poll interval for the repository named by `GITHUB_REPO`
const DEFAULT_REPO_POLL_SECS: u64 = 60;

type ProdTaskRepo = TaskRepositoryImpl<RedisStore>;
type ProdMonitorRepo = MonitorRepositoryImpl<RedisStore>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub task_service: Arc<TaskService<ProdTaskRepo>>,
    pub connections: Arc<ConnectionManager>,
    pub monitor: Arc<RepositoryMonitor<ProdMonitorRepo, GitHubClient>>,
    pub executor: Option<TaskExecutor<ProdTaskRepo>>,
}

impl HasServices for AppState {
    type TaskRepo = ProdTaskRepo;
    type MonitorRepo = ProdMonitorRepo;
    type Issues = GitHubClient;

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

/// Run the server without a workflow runner; tasks stay pending until an
/// external worker picks them up
pub async fn run(config: Config, metrics: Option<PrometheusHandle>) -> Result<()> {
    run_with_runner(config, metrics, None).await
}

/// Run the server, executing tasks with `runner` when given
pub async fn run_with_runner(
    config: Config,
    metrics: Option<PrometheusHandle>,
    runner: Option<Arc<dyn WorkflowRunner>>,
) -> Result<()> {
    let store = Arc::new(RedisStore::connect(&config.redis).await?);
    info!("Connected to Redis");

    let task_repo = Arc::new(TaskRepositoryImpl::new(
        store.clone(),
        Duration::from_secs(config.tasks.ttl_secs),
    ));
    let monitor_repo = Arc::new(MonitorRepositoryImpl::new(
        store,
        Duration::from_secs(config.monitor.repo_ttl_secs),
    ));

    let task_service = Arc::new(TaskService::new(task_repo));
    let connections = Arc::new(ConnectionManager::new());
    let github = Arc::new(GitHubClient::new(&config.github)?);
    let monitor = Arc::new(RepositoryMonitor::new(monitor_repo, github));
    let executor = runner
        .map(|runner| TaskExecutor::new(task_service.clone(), connections.clone(), runner));

    let loaded = monitor.load().await?;
    if loaded == 0 {
        register_default_repo(&config, &monitor).await?;
    }
    if config.monitor.create_tasks {
        monitor
            .register_callback(Arc::new(IssueTaskCallback::new(
                task_service.clone(),
                executor.clone(),
                config.github.token.clone(),
            )))
            .await;
    }
    if config.monitor.autostart {
        monitor.start().await;
    }

    let sweeper = spawn_retention_sweeper(task_service.clone(), &config.tasks);

    let state = AppState {
        config: Arc::new(config.clone()),
        task_service,
        connections,
        monitor: monitor.clone(),
        executor: executor.clone(),
    };

    let app = build_router(state).merge(metrics_router(metrics));

    let http_addr = config.http_addr();
    let listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("failed to bind {}", http_addr))?;
    info!("HTTP server started on {}", http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited unexpectedly")?;

    info!("Shutting down");
    monitor.stop().await;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    if let Some(executor) = executor {
        executor.shutdown(config.tasks.shutdown_grace()).await;
    }
    crate::telemetry::shutdown();
    Ok(())
}

/// Seed the monitor with `GITHUB_REPO` (`owner/repo`) when nothing was persisted
async fn register_default_repo(
    config: &Config,
    monitor: &RepositoryMonitor<ProdMonitorRepo, GitHubClient>,
) -> Result<()> {
    let (Some(full_name), Some(token)) = (&config.github.repo, &config.github.token) else {
        return Ok(());
    };
    let Some((owner, repo)) = full_name.split_once('/') else {
        tracing::warn!(repo = %full_name, "GITHUB_REPO is not in owner/repo form, ignoring");
        return Ok(());
    };
    monitor
        .add(owner, repo, token, DEFAULT_REPO_POLL_SECS)
        .await?;
    Ok(())
}

/// Periodically remove terminal tasks older than the retention window.
/// Disabled when the interval is zero or the window is out of range.
pub fn spawn_retention_sweeper<R: TaskRepository>(
    tasks: Arc<TaskService<R>>,
    config: &TaskConfig,
) -> Option<JoinHandle<()>> {
    if config.cleanup_interval_secs == 0 {
        return None;
    }
    let Some(max_age) = config.retention() else {
        tracing::warn!(
            retention_hours = config.retention_hours,
            "Retention window out of range, task cleanup disabled"
        );
        return None;
    };
    let mut ticker = tokio::time::interval(Duration::from_secs(config.cleanup_interval_secs));

    Some(tokio::spawn(async move {
        loop {
            ticker.tick().await;
            if let Err(e) = tasks.cleanup_old_tasks(max_age).await {
                tracing::warn!(error = %e, "Task cleanup failed");
            }
        }
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// `GET /metrics`, mounted with its own state
pub fn metrics_router(handle: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/metrics", get(api::metrics::metrics_handler))
        .with_state(Arc::new(handle))
}

/// Build the HTTP router with generic state type
///
/// Generic over the state so production `AppState` and test states that
/// implement `HasServices` share the same routes.
pub fn build_router<S: HasServices>(state: S) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(api::health::root))
        .route("/health", get(api::health::health::<S>))
        .route("/ready", get(api::health::ready::<S>))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::build()) }),
        )
        // Tasks
        .route(
            "/api/v1/tasks",
            get(api::task::list::<S>).post(api::task::create::<S>),
        )
        .route("/api/v1/tasks/stats/summary", get(api::task::stats::<S>))
        .route(
            "/api/v1/tasks/{id}",
            get(api::task::get::<S>).delete(api::task::cancel::<S>),
        )
        .route("/api/v1/tasks/{id}/retry", post(api::task::retry::<S>))
        .route("/api/v1/tasks/{id}/logs", get(api::task::logs::<S>))
        .route("/api/v1/tasks/{id}/diff", get(api::task::diff::<S>))
        // Live observation
        .route(
            "/api/v1/tasks/{id}/logs/stream",
            get(api::stream::log_stream::<S>),
        )
        .route("/api/v1/tasks/{id}/stream", get(api::stream::update_stream::<S>))
        .route("/ws/tasks/{id}", get(api::ws::task_socket::<S>))
        // Repository monitoring
        .route(
            "/api/v1/monitoring/repos",
            get(api::monitor::list_repos::<S>).post(api::monitor::add_repo::<S>),
        )
        .route(
            "/api/v1/monitoring/repos/{owner}/{repo}",
            delete(api::monitor::remove_repo::<S>),
        )
        .route("/api/v1/monitoring/status", get(api::monitor::status::<S>))
        .route("/api/v1/monitoring/start", post(api::monitor::start::<S>))
        .route("/api/v1/monitoring/stop", post(api::monitor::stop::<S>))
        // Webhooks
        .route("/api/v1/webhooks/github", post(api::webhook::github::<S>))
        .layer(ObservabilityLayer)
        .layer(TraceLayer::new_for_http().make_span_with(SanitizedMakeSpan))
        .layer(cors)
        .with_state(state)
}
