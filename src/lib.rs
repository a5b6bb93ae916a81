//! review-forge: AI code review task engine.
//!
//! Review tasks are persisted in a task store, scheduled on a prioritized
//! queue with processing leases, and reviewed by workers that call an AI
//! provider with a single fallback. Failed attempts are retried with
//! exponential backoff until the task's retry budget is spent.

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod review;
pub mod scheduler;
pub mod storage;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use error::{ProviderError, RegistryError, ReviewError, StoreError};
pub use review::{ReviewOrchestrator, ReviewResult};
pub use scheduler::{QueueError, RetryPolicy, Task, TaskIntake, TaskQueue, WorkerPool};
