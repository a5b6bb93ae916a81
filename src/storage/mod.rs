//! Durable task state.
//!
//! The `TaskStateStore` trait is the single source of truth for a task's
//! status, retry counter and timestamps. Two backends are provided:
//!
//! - **MemoryTaskStore**: mutex-guarded map, for tests and single-process runs
//! - **SqliteTaskStore**: sqlx-backed store with an idempotent schema migration
//!
//! Every backend applies the transition rules defined on
//! [`Task`](crate::scheduler::task::Task), so an illegal transition is
//! rejected the same way regardless of where tasks live.
//!
//! # Usage
//!
//! ```rust,ignore
//! use review_forge::storage::{SqliteTaskStore, TaskStateStore};
//! use review_forge::scheduler::task::{NewTask, TaskType};
//!
//! let store = SqliteTaskStore::connect("sqlite://review-forge.db").await?;
//! store.migrate().await?;
//!
//! let task = store
//!     .create(NewTask::new(1, TaskType::Push, "https://git.example/repo", "main", "abc"), 3)
//!     .await?;
//! store.mark_started(task.id).await?;
//! ```

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::scheduler::task::{NewTask, Task, TaskId, TaskStatus};

pub use memory::MemoryTaskStore;
pub use migrations::MigrationRunner;
pub use sqlite::SqliteTaskStore;

/// Persistence for review tasks.
///
/// Mutating operations return the updated record. They fail with
/// `StoreError::NotFound` for unknown ids and `StoreError::InvalidTransition`
/// when the task is not in the required status.
#[async_trait]
pub trait TaskStateStore: Send + Sync {
    /// Creates a PENDING task. Priority is derived from the task type.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Duplicate` if a task already exists for the same
    /// project and commit.
    async fn create(&self, new_task: NewTask, max_retries: u32) -> Result<Task, StoreError>;

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Looks up the task created for a project at a given commit.
    async fn find_by_commit(
        &self,
        project_id: i64,
        commit_hash: &str,
    ) -> Result<Option<Task>, StoreError>;

    /// Lists tasks in a status, oldest first.
    async fn find_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError>;

    /// PENDING -> RUNNING.
    async fn mark_started(&self, id: TaskId) -> Result<Task, StoreError>;

    /// RUNNING -> COMPLETED.
    async fn mark_completed(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Records a retryable failure: increments `retry_count` and moves the
    /// task to PENDING, or to FAILED once retries are exhausted.
    async fn mark_failed(&self, id: TaskId, error_message: &str) -> Result<Task, StoreError>;

    /// RUNNING -> FAILED without touching `retry_count`.
    async fn mark_failed_permanently(
        &self,
        id: TaskId,
        error_message: &str,
    ) -> Result<Task, StoreError>;

    /// Whether the task may be attempted again.
    async fn can_retry(&self, id: TaskId) -> Result<bool, StoreError> {
        self.find_by_id(id)
            .await?
            .map(|task| task.can_retry())
            .ok_or(StoreError::NotFound(id))
    }
}
