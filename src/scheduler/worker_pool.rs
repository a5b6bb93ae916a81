//! Worker pool for processing review tasks from the shared queue.
//!
//! Each worker runs as an independent async task: dequeue, review, record
//! the outcome, release the lease. Workers in other processes may pull from
//! the same queue; the atomic dequeue is the only coordination.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel
//! - Per-review timeout
//! - Lease renewal while a review runs
//! - Optional periodic reconciliation sweep
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricsCollector;
use crate::review::ReviewOrchestrator;
use crate::storage::TaskStateStore;

use super::classify::classify_failure;
use super::queue::TaskQueue;
use super::reconcile::Reconciler;
use super::retry::{RetryDecision, RetryPolicy};
use super::task::{FailureType, TaskId, TaskStatus};

/// Lower bound on the lease renewal period.
const MIN_RENEW_PERIOD: Duration = Duration::from_millis(10);

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,
    /// Maximum time allowed for one review, fallback included.
    pub review_timeout: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Interval between reconciliation sweeps; `None` disables them.
    pub reconcile_interval: Option<Duration>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_millis(500),
            review_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(60),
            reconcile_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the review timeout.
    pub fn with_review_timeout(mut self, timeout: Duration) -> Self {
        self.review_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets or disables the reconciliation interval.
    pub fn with_reconcile_interval(mut self, interval: Option<Duration>) -> Self {
        self.reconcile_interval = interval;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently running a review.
    pub active_workers: usize,
    /// Tasks reviewed successfully.
    pub tasks_completed: u64,
    /// Failed attempts that were scheduled for another try.
    pub tasks_retried: u64,
    /// Tasks that ended FAILED.
    pub tasks_failed: u64,
    /// Average attempt duration.
    pub average_task_duration: Duration,
}

impl PoolStats {
    /// Returns the number of attempts with a recorded outcome.
    pub fn total_processed(&self) -> u64 {
        self.tasks_completed + self.tasks_retried + self.tasks_failed
    }

    /// Returns the share of attempts that completed, as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.tasks_completed as f64 / total as f64) * 100.0
    }
}

/// What a worker did with a dequeued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Retried,
    Failed,
    /// Not processed or outcome not recorded; left to reconciliation.
    Skipped,
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    tasks_completed: AtomicU64,
    tasks_retried: AtomicU64,
    tasks_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            tasks_completed: AtomicU64::new(0),
            tasks_retried: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record(&self, outcome: TaskOutcome, duration: Duration) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.tasks_completed,
            TaskOutcome::Retried => &self.tasks_retried,
            TaskOutcome::Failed => &self.tasks_failed,
            TaskOutcome::Skipped => return,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.tasks_completed.load(Ordering::SeqCst);
        let retried = self.tasks_retried.load(Ordering::SeqCst);
        let failed = self.tasks_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total = completed + retried + failed;
        let average_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            tasks_completed: completed,
            tasks_retried: retried,
            tasks_failed: failed,
            average_task_duration: average_duration,
        }
    }
}

/// Everything a worker needs, shared across the pool.
#[derive(Clone)]
struct WorkerDeps {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn TaskStateStore>,
    orchestrator: Arc<ReviewOrchestrator>,
    retry: Arc<RetryPolicy>,
}

/// Worker pool that manages multiple workers processing tasks from a queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    deps: WorkerDeps,
    reconciler: Option<Arc<Reconciler>>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// # Arguments
    ///
    /// * `config` - Pool configuration
    /// * `queue` - Shared task queue
    /// * `store` - Durable task state
    /// * `orchestrator` - Runs the review for a task
    /// * `retry` - Applied to failed attempts
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn TaskStateStore>,
        orchestrator: Arc<ReviewOrchestrator>,
        retry: Arc<RetryPolicy>,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            deps: WorkerDeps {
                queue,
                store,
                orchestrator,
                retry,
            },
            reconciler: None,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Runs `reconciler` every `reconcile_interval` while the pool is up.
    pub fn with_reconciler(mut self, reconciler: Arc<Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                deps: self.deps.clone(),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                review_timeout: self.config.review_timeout,
                stats: Arc::clone(&self.stats),
                metrics: MetricsCollector::new(),
            };

            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        if let (Some(interval), Some(reconciler)) =
            (self.config.reconcile_interval, self.reconciler.clone())
        {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.worker_handles
                .push(tokio::spawn(run_reconciler(reconciler, interval, shutdown_rx)));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            num_workers = self.config.num_workers,
            reconcile = self.config.reconcile_interval.is_some() && self.reconciler.is_some(),
            "Worker pool started"
        );

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Workers finish the review they are running; idle workers stop at once.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

async fn run_reconciler(
    reconciler: Arc<Reconciler>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match reconciler.sweep().await {
                    Ok(stats) => debug!(
                        requeued_pending = stats.requeued_pending,
                        recovered_running = stats.recovered_running,
                        "Reconciliation sweep finished"
                    ),
                    Err(e) => warn!(error = %e, "Reconciliation sweep failed"),
                }
            }
        }
    }
    debug!("Reconciler stopped");
}

/// Renews the lease on `task_id` every third of the lease TTL until aborted.
///
/// Stops early once the lease is gone; the reconciler owns the task then.
async fn keep_lease(queue: Arc<dyn TaskQueue>, task_id: TaskId, worker_id: String) {
    let period = (queue.lease_ttl() / 3).max(MIN_RENEW_PERIOD);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the lease is fresh from dequeue.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match queue.renew_lock(task_id).await {
            Ok(true) => debug!(worker_id = %worker_id, task_id, "Task lease renewed"),
            Ok(false) => {
                warn!(worker_id = %worker_id, task_id, "Task lease lost during review");
                break;
            }
            Err(e) => {
                warn!(worker_id = %worker_id, task_id, error = %e, "Failed to renew task lease");
            }
        }
    }
}

/// A single worker that processes tasks from the queue.
struct Worker {
    id: String,
    deps: WorkerDeps,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    review_timeout: Duration,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    /// Main worker loop; returns once shutdown is signalled.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.deps.queue.dequeue().await {
                Ok(Some(task_id)) => {
                    let started = Instant::now();
                    let outcome = self.process_task(task_id).await;
                    self.stats.record(outcome, started.elapsed());
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue task");
                }
            }

            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes one leased task and always releases its lease.
    async fn process_task(&self, task_id: TaskId) -> TaskOutcome {
        let outcome = self.process_leased(task_id).await;

        if let Err(e) = self.deps.queue.release_lock(task_id).await {
            warn!(worker_id = %self.id, task_id, error = %e, "Failed to release task lease");
        }
        outcome
    }

    async fn process_leased(&self, task_id: TaskId) -> TaskOutcome {
        let store = &self.deps.store;

        match store.find_by_id(task_id).await {
            Ok(Some(task)) if task.status == TaskStatus::Pending => {}
            Ok(Some(task)) => {
                warn!(worker_id = %self.id, task_id, status = %task.status, "Dequeued task is not PENDING, skipping");
                return TaskOutcome::Skipped;
            }
            Ok(None) => {
                warn!(worker_id = %self.id, task_id, "Dequeued task not found, skipping");
                return TaskOutcome::Skipped;
            }
            Err(e) => {
                error!(worker_id = %self.id, task_id, error = %e, "Failed to load task");
                return TaskOutcome::Skipped;
            }
        }

        let task = match store.mark_started(task_id).await {
            Ok(task) => task,
            Err(e) => {
                error!(worker_id = %self.id, task_id, error = %e, "Failed to mark task started");
                return TaskOutcome::Skipped;
            }
        };

        info!(
            worker_id = %self.id,
            task_id,
            attempt = task.retry_count + 1,
            priority = %task.priority,
            "Processing task"
        );

        self.stats.increment_active();
        self.metrics.worker_started();
        let renewer = tokio::spawn(keep_lease(
            Arc::clone(&self.deps.queue),
            task_id,
            self.id.clone(),
        ));
        let review = tokio::time::timeout(
            self.review_timeout,
            self.deps.orchestrator.review(&task),
        )
        .await;
        renewer.abort();
        self.metrics.worker_finished();
        self.stats.decrement_active();

        match review {
            Ok(Ok(result)) if result.success => match store.mark_completed(task_id).await {
                Ok(_) => {
                    self.metrics.record_task_outcome("completed");
                    info!(
                        worker_id = %self.id,
                        task_id,
                        issues = result.issues.len(),
                        degraded = !result.degradation_events().is_empty(),
                        "Task completed"
                    );
                    TaskOutcome::Completed
                }
                Err(e) => {
                    error!(worker_id = %self.id, task_id, error = %e, "Failed to mark task completed");
                    TaskOutcome::Skipped
                }
            },
            Ok(Ok(result)) => {
                let message = result
                    .error_message
                    .unwrap_or_else(|| "Review failed without an error message".to_string());
                let failure_type = classify_failure(&message);
                warn!(
                    worker_id = %self.id,
                    task_id,
                    failure_type = %failure_type,
                    error = %message,
                    "Review failed"
                );
                self.fail(task_id, &message, failure_type).await
            }
            Ok(Err(e)) => {
                error!(worker_id = %self.id, task_id, error = %e, "Review could not run");
                self.fail(task_id, &e.to_string(), FailureType::Unknown)
                    .await
            }
            Err(_) => {
                let message = format!(
                    "Review timed out after {}s",
                    self.review_timeout.as_secs_f64()
                );
                warn!(worker_id = %self.id, task_id, "Review timed out");
                self.fail(task_id, &message, FailureType::Timeout).await
            }
        }
    }

    async fn fail(&self, task_id: TaskId, message: &str, failure_type: FailureType) -> TaskOutcome {
        match self
            .deps
            .retry
            .handle_task_failure(task_id, message, failure_type)
            .await
        {
            Ok(RetryDecision::Requeued { .. }) => TaskOutcome::Retried,
            Ok(RetryDecision::Exhausted | RetryDecision::PermanentFailure) => TaskOutcome::Failed,
            Err(e) => {
                error!(worker_id = %self.id, task_id, error = %e, "Failed to record task failure");
                TaskOutcome::Skipped
            }
        }
    }
}
