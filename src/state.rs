//! Application state traits for dependency injection
//!
//! Handlers are generic over [`HasServices`], so the production `AppState`
//! (Redis + GitHub) and test states (in-memory store, scripted issue source)
//! share the same handler code.

use crate::config::Config;
use crate::monitor::{IssueSource, RepositoryMonitor};
use crate::repository::{MonitorRepository, TaskRepository};
use crate::runner::TaskExecutor;
use crate::service::TaskService;
use crate::ws::ConnectionManager;
use std::sync::Arc;

pub trait HasServices: Clone + Send + Sync + 'static {
    /// The task repository type
    type TaskRepo: TaskRepository;
    /// The monitored repository store type
    type MonitorRepo: MonitorRepository;
    /// Where the monitor fetches issues from
    type Issues: IssueSource;

    fn config(&self) -> &Config;

    /// The task manager
    fn task_service(&self) -> &Arc<TaskService<Self::TaskRepo>>;

    /// WebSocket registry
    fn connections(&self) -> &Arc<ConnectionManager>;

    fn monitor(&self) -> &RepositoryMonitor<Self::MonitorRepo, Self::Issues>;

    /// Background workflow executor, when a runner is configured
    fn executor(&self) -> Option<&TaskExecutor<Self::TaskRepo>>;

    /// Whether the task store answers
    fn check_ready(&self) -> impl std::future::Future<Output = bool> + Send;
}
