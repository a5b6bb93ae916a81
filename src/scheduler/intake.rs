//! Task submission.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::StoreError;
use crate::storage::TaskStateStore;

use super::queue::TaskQueue;
use super::task::{NewTask, Task, DEFAULT_MAX_RETRIES};

/// Result of [`TaskIntake::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A new task was created and handed to the queue.
    Created(Task),
    /// A task already existed for the same project and commit.
    Existing(Task),
}

impl SubmitOutcome {
    pub fn task(&self) -> &Task {
        match self {
            SubmitOutcome::Created(task) | SubmitOutcome::Existing(task) => task,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, SubmitOutcome::Created(_))
    }
}

/// Creates tasks from change events and enqueues them.
pub struct TaskIntake {
    store: Arc<dyn TaskStateStore>,
    queue: Arc<dyn TaskQueue>,
    max_retries: u32,
}

impl TaskIntake {
    pub fn new(store: Arc<dyn TaskStateStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            store,
            queue,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Sets the retry budget given to new tasks.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Submits a change for review.
    ///
    /// At most one task exists per project and commit; resubmitting returns
    /// the existing task untouched. A new task is enqueued after it is
    /// stored. If enqueueing fails the task stays PENDING and the reconciler
    /// picks it up later.
    ///
    /// # Errors
    ///
    /// Returns the store error if the task cannot be looked up or created.
    pub async fn submit(&self, new_task: NewTask) -> Result<SubmitOutcome, StoreError> {
        if let Some(existing) = self
            .store
            .find_by_commit(new_task.project_id, &new_task.commit_hash)
            .await?
        {
            info!(
                task_id = existing.id,
                project_id = existing.project_id,
                commit = %existing.commit_hash,
                "Task already exists for commit"
            );
            return Ok(SubmitOutcome::Existing(existing));
        }

        let project_id = new_task.project_id;
        let commit_hash = new_task.commit_hash.clone();
        let task = match self.store.create(new_task, self.max_retries).await {
            Ok(task) => task,
            // Lost a race with a concurrent submission of the same commit.
            Err(StoreError::Duplicate { .. }) => {
                return self
                    .store
                    .find_by_commit(project_id, &commit_hash)
                    .await?
                    .map(SubmitOutcome::Existing)
                    .ok_or(StoreError::Duplicate {
                        project_id,
                        commit_hash,
                    });
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.queue.enqueue(task.id, task.priority).await {
            error!(
                task_id = task.id,
                error = %e,
                "Failed to enqueue task; reconciliation will re-enqueue it"
            );
        }

        info!(
            task_id = task.id,
            project_id = task.project_id,
            task_type = %task.task_type,
            priority = %task.priority,
            "Task submitted"
        );
        Ok(SubmitOutcome::Created(task))
    }
}
