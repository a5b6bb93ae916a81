//! Task scheduling: priority queue, retry policy and worker pool.
//!
//! This module provides the infrastructure that moves review tasks from
//! submission to a final state:
//!
//! - **TaskQueue**: priority queue with delayed visibility and processing
//!   leases (Redis sorted set or in-memory)
//! - **RetryPolicy**: classifies failures, reschedules with backoff
//! - **WorkerPool**: workers that dequeue, review and record outcomes
//! - **TaskIntake**: deduplicating task submission
//! - **Reconciler**: repairs store/queue drift after crashes
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  TaskIntake  │
//!                      │  (CLI/API)   │
//!                      └──────┬───────┘
//!                 store first │ then enqueue
//!                      ┌──────▼───────┐      ┌────────────┐
//!                      │  TaskQueue   │◄─────┤ Reconciler │
//!                      │ (ZSET+lease) │      └────────────┘
//!                      └──────┬───────┘
//!                             │ atomic dequeue
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         └──── ReviewOrchestrator / RetryPolicy ─┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use review_forge::scheduler::{
//!     RedisTaskQueue, RetryPolicy, TaskIntake, WorkerPool, WorkerPoolConfig,
//! };
//!
//! let queue = Arc::new(RedisTaskQueue::connect("redis://localhost:6379").await?);
//! let retry = Arc::new(RetryPolicy::new(store.clone(), queue.clone()));
//!
//! TaskIntake::new(store.clone(), queue.clone()).submit(new_task).await?;
//!
//! let mut pool = WorkerPool::new(WorkerPoolConfig::new(4), queue, store, orchestrator, retry);
//! pool.start().await?;
//! // ...
//! pool.shutdown().await?;
//! ```

pub mod classify;
pub mod intake;
pub mod memory_queue;
pub mod queue;
pub mod reconcile;
pub mod redis_queue;
pub mod retry;
pub mod task;
pub mod worker_pool;

pub use classify::classify_failure;
pub use intake::{SubmitOutcome, TaskIntake};
pub use memory_queue::MemoryTaskQueue;
pub use queue::{
    now_millis, queue_score, ready_at_from_score, QueueError, TaskQueue, DEFAULT_LEASE_TTL,
    DEFAULT_LOCK_PREFIX, DEFAULT_QUEUE_KEY, PRIORITY_MULTIPLIER,
};
pub use reconcile::{ReconcileError, ReconcileStats, Reconciler, LEASE_EXPIRED_MESSAGE};
pub use redis_queue::RedisTaskQueue;
pub use retry::{RetryDecision, RetryPolicy};
pub use task::{
    FailureType, NewTask, Task, TaskId, TaskPriority, TaskStatus, TaskType, DEFAULT_MAX_RETRIES,
};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
