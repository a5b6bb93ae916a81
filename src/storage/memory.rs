//! In-memory task store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::scheduler::task::{NewTask, Task, TaskId, TaskStatus};

use super::TaskStateStore;

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    next_id: TaskId,
}

/// Task store backed by a mutex-guarded map.
///
/// Ids are assigned sequentially starting at 1.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a task record as is.
    ///
    /// Used to seed fixtures in a specific state.
    pub async fn insert(&self, task: Task) {
        let mut inner = self.inner.lock().await;
        inner.next_id = inner.next_id.max(task.id);
        inner.tasks.insert(task.id, task);
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn update<F>(&self, id: TaskId, apply: F) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task) -> Result<(), StoreError> + Send,
    {
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        // Apply on a copy so a rejected transition leaves the record untouched.
        let mut updated = task.clone();
        apply(&mut updated)?;
        *task = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl TaskStateStore for MemoryTaskStore {
    async fn create(&self, new_task: NewTask, max_retries: u32) -> Result<Task, StoreError> {
        let mut inner = self.inner.lock().await;

        let duplicate = inner.tasks.values().any(|t| {
            t.project_id == new_task.project_id && t.commit_hash == new_task.commit_hash
        });
        if duplicate {
            return Err(StoreError::Duplicate {
                project_id: new_task.project_id,
                commit_hash: new_task.commit_hash,
            });
        }

        inner.next_id += 1;
        let task = Task::from_new(inner.next_id, new_task, max_retries, Utc::now());
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.inner.lock().await.tasks.get(&id).cloned())
    }

    async fn find_by_commit(
        &self,
        project_id: i64,
        commit_hash: &str,
    ) -> Result<Option<Task>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .values()
            .find(|t| t.project_id == project_id && t.commit_hash == commit_hash)
            .cloned())
    }

    async fn find_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn mark_started(&self, id: TaskId) -> Result<Task, StoreError> {
        self.update(id, |task| task.start(Utc::now())).await
    }

    async fn mark_completed(&self, id: TaskId) -> Result<Task, StoreError> {
        self.update(id, |task| task.complete(Utc::now())).await
    }

    async fn mark_failed(&self, id: TaskId, error_message: &str) -> Result<Task, StoreError> {
        self.update(id, |task| task.record_failure(error_message, Utc::now()))
            .await
    }

    async fn mark_failed_permanently(
        &self,
        id: TaskId,
        error_message: &str,
    ) -> Result<Task, StoreError> {
        self.update(id, |task| task.fail_permanently(error_message, Utc::now()))
            .await
    }
}
