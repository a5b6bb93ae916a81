//! Task-level retry policy.
//!
//! Decides what happens to a task after a failed review attempt:
//!
//! | Failure                                 | Durable write              | Queue                    |
//! |-----------------------------------------|----------------------------|--------------------------|
//! | VALIDATION_ERROR, AUTHENTICATION_ERROR  | `mark_failed_permanently`  | lease released           |
//! | retryable, retries left                 | `mark_failed` (PENDING)    | `requeue_with_delay`     |
//! | retryable, retries exhausted            | `mark_failed` (FAILED)     | lease released           |
//!
//! The durable write always happens first. A queue write that fails after it
//! is logged and left to the reconciler, which re-enqueues PENDING tasks that
//! have no queue entry.

use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::metrics::MetricsCollector;
use crate::storage::TaskStateStore;

use super::queue::TaskQueue;
use super::task::{FailureType, TaskId, TaskStatus};

/// Largest exponent used for backoff (2^16 s is about 18 hours).
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Outcome of [`RetryPolicy::handle_task_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to PENDING and queued again after `delay`.
    Requeued { attempt: u32, delay: Duration },
    /// Retryable failure, but no retries left.
    Exhausted,
    /// Non-retryable failure.
    PermanentFailure,
}

impl RetryDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryDecision::Requeued { .. } => "requeued",
            RetryDecision::Exhausted => "exhausted",
            RetryDecision::PermanentFailure => "permanent",
        }
    }
}

/// Applies failure classification to the task store and queue.
pub struct RetryPolicy {
    store: Arc<dyn TaskStateStore>,
    queue: Arc<dyn TaskQueue>,
    metrics: MetricsCollector,
}

impl RetryPolicy {
    pub fn new(store: Arc<dyn TaskStateStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            store,
            queue,
            metrics: MetricsCollector::new(),
        }
    }

    /// Whether a failure of this type may be retried.
    pub fn is_retryable(failure_type: FailureType) -> bool {
        failure_type.is_retryable()
    }

    /// Backoff before attempt `retry_count + 1`.
    ///
    /// `2^retry_count` seconds plus up to one second of jitter, never less
    /// than one second: 0 -> [1, 2) s, 1 -> [2, 3) s, 2 -> [4, 5) s.
    pub fn calculate_retry_delay(retry_count: u32) -> Duration {
        let exponent = retry_count.min(MAX_BACKOFF_EXPONENT);
        let base_ms = (1u64 << exponent) * 1000;
        let jitter_ms: u64 = rand::rng().random_range(0..1000);
        Duration::from_millis((base_ms + jitter_ms).max(1000))
    }

    /// Records a failed attempt and reschedules or terminates the task.
    ///
    /// # Arguments
    ///
    /// * `task_id` - Task whose attempt failed; it must be RUNNING
    /// * `error_message` - Stored on the task record
    /// * `failure_type` - Classification of the failure
    ///
    /// # Errors
    ///
    /// Returns the store error if the durable write fails. Queue errors after
    /// a successful durable write are logged, not returned.
    pub async fn handle_task_failure(
        &self,
        task_id: TaskId,
        error_message: &str,
        failure_type: FailureType,
    ) -> Result<RetryDecision, StoreError> {
        if !Self::is_retryable(failure_type) {
            self.store
                .mark_failed_permanently(task_id, error_message)
                .await?;
            self.release(task_id).await;

            warn!(
                task_id,
                failure_type = %failure_type,
                error = %error_message,
                "Task failed permanently"
            );
            self.metrics.record_task_outcome(RetryDecision::PermanentFailure.as_str());
            return Ok(RetryDecision::PermanentFailure);
        }

        let task = self.store.mark_failed(task_id, error_message).await?;

        if task.status == TaskStatus::Failed {
            self.release(task_id).await;

            warn!(
                task_id,
                failure_type = %failure_type,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                "Task retries exhausted"
            );
            self.metrics.record_task_outcome(RetryDecision::Exhausted.as_str());
            return Ok(RetryDecision::Exhausted);
        }

        let delay = Self::calculate_retry_delay(task.retry_count.saturating_sub(1));
        if let Err(e) = self
            .queue
            .requeue_with_delay(task_id, task.priority, delay)
            .await
        {
            error!(
                task_id,
                error = %e,
                "Failed to requeue task; reconciliation will re-enqueue it"
            );
        }

        info!(
            task_id,
            failure_type = %failure_type,
            attempt = task.retry_count,
            max_retries = task.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Task scheduled for retry"
        );

        let decision = RetryDecision::Requeued {
            attempt: task.retry_count,
            delay,
        };
        self.metrics.record_task_outcome(decision.as_str());
        Ok(decision)
    }

    async fn release(&self, task_id: TaskId) {
        if let Err(e) = self.queue.release_lock(task_id).await {
            warn!(task_id, error = %e, "Failed to release task lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_bounds() {
        for _ in 0..50 {
            let d0 = RetryPolicy::calculate_retry_delay(0);
            assert!(d0 >= Duration::from_secs(1) && d0 < Duration::from_secs(2));

            let d1 = RetryPolicy::calculate_retry_delay(1);
            assert!(d1 >= Duration::from_secs(2) && d1 < Duration::from_secs(3));

            let d2 = RetryPolicy::calculate_retry_delay(2);
            assert!(d2 >= Duration::from_secs(4) && d2 < Duration::from_secs(5));
        }
    }

    #[test]
    fn test_delay_exponent_is_capped() {
        let capped = RetryPolicy::calculate_retry_delay(u32::MAX);
        assert!(capped >= Duration::from_secs(1 << MAX_BACKOFF_EXPONENT));
        assert!(capped < Duration::from_secs((1 << MAX_BACKOFF_EXPONENT) + 1));
    }

    #[test]
    fn test_is_retryable_table() {
        assert!(RetryPolicy::is_retryable(FailureType::RateLimit));
        assert!(RetryPolicy::is_retryable(FailureType::Unknown));
        assert!(!RetryPolicy::is_retryable(FailureType::ValidationError));
        assert!(!RetryPolicy::is_retryable(FailureType::AuthenticationError));
    }

    #[test]
    fn test_decision_labels() {
        assert_eq!(RetryDecision::Exhausted.as_str(), "exhausted");
        assert_eq!(RetryDecision::PermanentFailure.as_str(), "permanent");
        assert_eq!(
            RetryDecision::Requeued {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
            .as_str(),
            "requeued"
        );
    }
}
