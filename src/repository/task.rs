//! Task record repository

use super::keys;
use crate::domain::Task;
use crate::error::Result;
use crate::store::KeyValueStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskRepository: Send + Sync + 'static {
    /// Full-record overwrite; resets the sliding TTL
    async fn save(&self, task: &Task) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Task>>;
    /// Every id in the index; some may point at expired records
    async fn list_ids(&self) -> Result<Vec<String>>;
    async fn add_to_index(&self, id: &str) -> Result<()>;
    async fn remove_from_index(&self, id: &str) -> Result<()>;
    /// Removes record and index entry, returns whether the record existed
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn ping(&self) -> bool;
}

pub struct TaskRepositoryImpl<K: KeyValueStore> {
    store: Arc<K>,
    ttl: Duration,
}

impl<K: KeyValueStore> TaskRepositoryImpl<K> {
    pub fn new(store: Arc<K>, ttl: Duration) -> Self {
        Self { store, ttl }
    }
}

#[async_trait]
impl<K: KeyValueStore> TaskRepository for TaskRepositoryImpl<K> {
    async fn save(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_string(task)?;
        self.store
            .set_ex(&keys::task(&task.id), &payload, self.ttl)
            .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        match self.store.get(&keys::task(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        self.store.set_members(keys::TASK_INDEX).await
    }

    async fn add_to_index(&self, id: &str) -> Result<()> {
        self.store.set_add(keys::TASK_INDEX, id).await
    }

    async fn remove_from_index(&self, id: &str) -> Result<()> {
        self.store.set_remove(keys::TASK_INDEX, id).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let existed = self.store.delete(&keys::task(id)).await?;
        self.store.set_remove(keys::TASK_INDEX, id).await?;
        Ok(existed)
    }

    async fn ping(&self) -> bool {
        self.store.ping().await
    }
}
