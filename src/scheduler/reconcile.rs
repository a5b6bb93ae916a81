//! Repairs drift between the task store and the queue.
//!
//! The store is written before the queue, so a crash or a queue outage
//! between the two writes leaves a task that no worker will ever see. A
//! worker that dies mid-review leaves a RUNNING task whose lease simply
//! expires. A sweep finds both cases:
//!
//! - RUNNING, lease gone, started longer than the lease TTL ago: the attempt
//!   is counted as failed through the retry policy (`UNKNOWN`), so it is
//!   requeued with backoff or exhausted.
//! - PENDING, untouched for longer than the grace period, neither queued nor
//!   leased: enqueued again with its priority.
//!
//! Sweeps are idempotent and safe to run from several processes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::metrics::MetricsCollector;
use crate::storage::TaskStateStore;

use super::queue::{QueueError, TaskQueue};
use super::retry::RetryPolicy;
use super::task::{FailureType, TaskStatus};

/// Error message stored on tasks recovered from a dead worker.
pub const LEASE_EXPIRED_MESSAGE: &str = "Worker lease expired while task was running";

/// Default minimum age of a PENDING task before it is re-enqueued.
pub const DEFAULT_PENDING_GRACE: Duration = Duration::from_secs(60);

/// Default number of tasks examined per status in one sweep.
pub const DEFAULT_SWEEP_LIMIT: usize = 500;

/// Errors that abort a sweep.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Task store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Tasks repaired by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub requeued_pending: u64,
    pub recovered_running: u64,
}

impl ReconcileStats {
    pub fn total(&self) -> u64 {
        self.requeued_pending + self.recovered_running
    }
}

/// Periodic store/queue consistency sweep.
pub struct Reconciler {
    store: Arc<dyn TaskStateStore>,
    queue: Arc<dyn TaskQueue>,
    retry: Arc<RetryPolicy>,
    lease_ttl: Duration,
    pending_grace: Duration,
    sweep_limit: usize,
    metrics: MetricsCollector,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TaskStateStore>,
        queue: Arc<dyn TaskQueue>,
        retry: Arc<RetryPolicy>,
    ) -> Self {
        let lease_ttl = queue.lease_ttl();
        Self {
            store,
            queue,
            retry,
            lease_ttl,
            pending_grace: DEFAULT_PENDING_GRACE,
            sweep_limit: DEFAULT_SWEEP_LIMIT,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_pending_grace(mut self, grace: Duration) -> Self {
        self.pending_grace = grace;
        self
    }

    pub fn with_sweep_limit(mut self, limit: usize) -> Self {
        self.sweep_limit = limit;
        self
    }

    /// Runs one sweep.
    ///
    /// # Errors
    ///
    /// Returns the first store or queue error; tasks handled before it stay
    /// handled.
    pub async fn sweep(&self) -> Result<ReconcileStats, ReconcileError> {
        let now = Utc::now();
        let mut stats = ReconcileStats::default();

        for task in self
            .store
            .find_by_status(TaskStatus::Running, self.sweep_limit)
            .await?
        {
            let started = task.started_at.unwrap_or(task.updated_at);
            if age(now, started) < self.lease_ttl || self.queue.is_locked(task.id).await? {
                continue;
            }

            match self
                .retry
                .handle_task_failure(task.id, LEASE_EXPIRED_MESSAGE, FailureType::Unknown)
                .await
            {
                Ok(decision) => {
                    warn!(
                        task_id = task.id,
                        decision = decision.as_str(),
                        "Recovered task from expired lease"
                    );
                    stats.recovered_running += 1;
                }
                // The worker finished it between the listing and now.
                Err(StoreError::InvalidTransition { .. }) => {
                    debug!(task_id = task.id, "Task left RUNNING during sweep");
                }
                Err(e) => return Err(e.into()),
            }
        }

        for task in self
            .store
            .find_by_status(TaskStatus::Pending, self.sweep_limit)
            .await?
        {
            if age(now, task.updated_at) < self.pending_grace {
                continue;
            }
            if self.queue.contains(task.id).await? || self.queue.is_locked(task.id).await? {
                continue;
            }

            self.queue.enqueue(task.id, task.priority).await?;
            info!(task_id = task.id, priority = %task.priority, "Re-enqueued orphaned task");
            stats.requeued_pending += 1;
        }

        if let Ok(depth) = self.queue.queue_size().await {
            self.metrics.set_queue_depth(depth);
        }
        self.metrics
            .record_reconcile("requeued_pending", stats.requeued_pending);
        self.metrics
            .record_reconcile("recovered_running", stats.recovered_running);

        if stats.total() > 0 {
            info!(
                requeued_pending = stats.requeued_pending,
                recovered_running = stats.recovered_running,
                "Reconciliation sweep repaired tasks"
            );
        }
        Ok(stats)
    }
}

/// Elapsed time since `since`; zero if it lies in the future.
fn age(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
