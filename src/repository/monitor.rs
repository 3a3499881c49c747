//! Monitored repository persistence

use super::keys;
use crate::domain::MonitoredRepo;
use crate::error::Result;
use crate::store::KeyValueStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MonitorRepository: Send + Sync + 'static {
    async fn save(&self, repo: &MonitoredRepo) -> Result<()>;
    async fn delete(&self, owner: &str, repo: &str) -> Result<bool>;
    /// All persisted records; undecodable ones are skipped
    async fn load_all(&self) -> Result<Vec<MonitoredRepo>>;
}

pub struct MonitorRepositoryImpl<K: KeyValueStore> {
    store: Arc<K>,
    ttl: Duration,
}

impl<K: KeyValueStore> MonitorRepositoryImpl<K> {
    pub fn new(store: Arc<K>, ttl: Duration) -> Self {
        Self { store, ttl }
    }
}

#[async_trait]
impl<K: KeyValueStore> MonitorRepository for MonitorRepositoryImpl<K> {
    async fn save(&self, repo: &MonitoredRepo) -> Result<()> {
        let payload = serde_json::to_string(repo)?;
        self.store
            .set_ex(&keys::monitored_repo(&repo.owner, &repo.repo), &payload, self.ttl)
            .await
    }

    async fn delete(&self, owner: &str, repo: &str) -> Result<bool> {
        self.store.delete(&keys::monitored_repo(owner, repo)).await
    }

    async fn load_all(&self) -> Result<Vec<MonitoredRepo>> {
        let mut repos = Vec::new();
        for key in self.store.scan_keys(&keys::monitored_repo_pattern()).await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<MonitoredRepo>(&raw) {
                Ok(repo) => repos.push(repo),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping undecodable monitor record"),
            }
        }
        Ok(repos)
    }
}
