//! Priority task queue with per-task processing leases.
//!
//! The queue holds task ids ordered by a score that encodes both priority and
//! the earliest time the task may run:
//!
//! ```text
//! score = rank(priority) * 10^13 + ready_at_epoch_millis
//! rank  = 100 - weight        (HIGH = 0, NORMAL = 50)
//! ```
//!
//! Epoch milliseconds stay below 10^13 until the year 2286, so priority
//! strictly dominates time and `ready_at = score mod 10^13`.
//!
//! # Dequeue
//!
//! `dequeue` peeks the lowest score. If that entry is not ready yet nothing
//! is returned, even when a later entry is ready (head-of-line blocking).
//! Otherwise the entry is removed and a lease (`set-if-absent` with a TTL) is
//! taken on the task id. If another worker holds the lease the entry is put
//! back with its original score. The peek, removal, lease and reinsertion
//! happen as one atomic step, so concurrent workers never receive the same id.
//!
//! A worker renews its lease while the review runs, so a task stays RUNNING
//! only as long as some worker keeps its lease alive.
//!
//! # Backends
//!
//! - [`RedisTaskQueue`](super::RedisTaskQueue): sorted set plus lease keys,
//!   dequeue runs as a server-side Lua script
//! - [`MemoryTaskQueue`](super::MemoryTaskQueue): single-process, one mutex

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;

use super::task::{TaskId, TaskPriority};

/// Multiplier separating priority tiers in a queue score.
pub const PRIORITY_MULTIPLIER: u64 = 10_000_000_000_000;

/// Default lease lifetime for a dequeued task.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);

/// Default sorted-set key.
pub const DEFAULT_QUEUE_KEY: &str = "task:queue";

/// Default prefix of lease keys.
pub const DEFAULT_LOCK_PREFIX: &str = "task:lock:";

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),
}

/// Computes the queue score for a task becoming ready at `ready_at_millis`.
pub fn queue_score(priority: TaskPriority, ready_at_millis: u64) -> u64 {
    priority.rank() * PRIORITY_MULTIPLIER + ready_at_millis
}

/// Recovers the ready-at timestamp (epoch millis) from a score.
pub fn ready_at_from_score(score: u64) -> u64 {
    score % PRIORITY_MULTIPLIER
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A shared priority queue of task ids with processing leases.
///
/// `dequeue` returning `None` means "nothing to do right now": the queue is
/// empty, its head is not ready, or another worker won the lease. Callers
/// back off before polling again.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Adds a task, ready immediately.
    ///
    /// Entries are keyed by task id; enqueueing an id that is already queued
    /// replaces its score.
    async fn enqueue(&self, task_id: TaskId, priority: TaskPriority) -> Result<(), QueueError>;

    /// Claims the next ready task and takes its lease.
    async fn dequeue(&self) -> Result<Option<TaskId>, QueueError>;

    /// Releases the lease and re-adds the task, ready after `delay`.
    async fn requeue_with_delay(
        &self,
        task_id: TaskId,
        priority: TaskPriority,
        delay: Duration,
    ) -> Result<(), QueueError>;

    /// Number of queued entries, ready or not.
    async fn queue_size(&self) -> Result<u64, QueueError>;

    /// Whether a live lease exists for the task.
    async fn is_locked(&self, task_id: TaskId) -> Result<bool, QueueError>;

    /// Extends a live lease by the full TTL.
    ///
    /// Returns `false` when the lease has already expired or belongs to
    /// someone else; it is not re-created.
    async fn renew_lock(&self, task_id: TaskId) -> Result<bool, QueueError>;

    /// Lifetime of a lease that is not renewed.
    fn lease_ttl(&self) -> Duration;

    /// Drops the task's lease. Releasing an absent lease is a no-op.
    async fn release_lock(&self, task_id: TaskId) -> Result<(), QueueError>;

    /// Whether the task currently has a queue entry.
    async fn contains(&self, task_id: TaskId) -> Result<bool, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_priority_dominates_time() {
        let now = now_millis();
        let high_late = queue_score(TaskPriority::High, now + 86_400_000);
        let normal_now = queue_score(TaskPriority::Normal, now);
        assert!(high_late < normal_now);
    }

    #[test]
    fn test_score_layout() {
        assert_eq!(queue_score(TaskPriority::High, 1_700_000_000_000), 1_700_000_000_000);
        assert_eq!(
            queue_score(TaskPriority::Normal, 1_700_000_000_000),
            500_000_000_000_000 + 1_700_000_000_000
        );
    }

    #[test]
    fn test_ready_at_round_trips_through_score() {
        let ready_at = 1_734_567_890_123;
        for priority in [TaskPriority::High, TaskPriority::Normal] {
            assert_eq!(ready_at_from_score(queue_score(priority, ready_at)), ready_at);
        }
    }

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));
    }
}
