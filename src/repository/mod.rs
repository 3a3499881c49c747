//! Data access layer (Repository pattern)

pub mod monitor;
pub mod task;

pub use monitor::{MonitorRepository, MonitorRepositoryImpl};
pub use task::{TaskRepository, TaskRepositoryImpl};

/// Store key layout
pub(crate) mod keys {
    pub const TASK_PREFIX: &str = "task:";
    pub const TASK_INDEX: &str = "tasks:all";
    pub const MONITOR_PREFIX: &str = "monitor:repo:";

    pub fn task(id: &str) -> String {
        format!("{}{}", TASK_PREFIX, id)
    }

    pub fn monitored_repo(owner: &str, repo: &str) -> String {
        format!("{}{}_{}", MONITOR_PREFIX, owner, repo)
    }

    pub fn monitored_repo_pattern() -> String {
        format!("{}*", MONITOR_PREFIX)
    }

}
