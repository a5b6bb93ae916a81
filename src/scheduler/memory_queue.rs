//! Single-process task queue.
//!
//! Same contract as the Redis queue, held in one mutex. Entries with equal
//! scores are served in insertion order.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::queue::{
    now_millis, queue_score, ready_at_from_score, QueueError, TaskQueue, DEFAULT_LEASE_TTL,
};
use super::task::{TaskId, TaskPriority};

/// (score, insertion sequence)
type EntryKey = (u64, u64);

#[derive(Default)]
struct Inner {
    entries: BTreeMap<EntryKey, TaskId>,
    index: HashMap<TaskId, EntryKey>,
    leases: HashMap<TaskId, Instant>,
    seq: u64,
}

impl Inner {
    fn insert(&mut self, task_id: TaskId, score: u64) {
        if let Some(old) = self.index.remove(&task_id) {
            self.entries.remove(&old);
        }
        self.seq += 1;
        let key = (score, self.seq);
        self.entries.insert(key, task_id);
        self.index.insert(task_id, key);
    }

    fn lease_live(&self, task_id: TaskId, now: Instant) -> bool {
        self.leases
            .get(&task_id)
            .map(|expires| *expires > now)
            .unwrap_or(false)
    }
}

/// In-memory implementation of [`TaskQueue`].
pub struct MemoryTaskQueue {
    inner: Mutex<Inner>,
    lease_ttl: Duration,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    /// Sets how long a lease survives without being released.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Ready-at timestamp (epoch millis) of a queued task.
    pub async fn ready_at(&self, task_id: TaskId) -> Option<u64> {
        let inner = self.inner.lock().await;
        inner.index.get(&task_id).map(|(score, _)| ready_at_from_score(*score))
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task_id: TaskId, priority: TaskPriority) -> Result<(), QueueError> {
        let score = queue_score(priority, now_millis());
        self.inner.lock().await.insert(task_id, score);
        tracing::debug!(task_id, priority = %priority, score, "Task enqueued");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<TaskId>, QueueError> {
        let mut inner = self.inner.lock().await;

        let Some((&key, &task_id)) = inner.entries.iter().next() else {
            return Ok(None);
        };

        if ready_at_from_score(key.0) > now_millis() {
            return Ok(None);
        }

        let now = Instant::now();
        if inner.lease_live(task_id, now) {
            // Lease held elsewhere: the entry stays where it is.
            return Ok(None);
        }

        inner.entries.remove(&key);
        inner.index.remove(&task_id);
        inner.leases.insert(task_id, now + self.lease_ttl);
        Ok(Some(task_id))
    }

    async fn requeue_with_delay(
        &self,
        task_id: TaskId,
        priority: TaskPriority,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let ready_at = now_millis() + delay.as_millis() as u64;
        let mut inner = self.inner.lock().await;
        inner.leases.remove(&task_id);
        inner.insert(task_id, queue_score(priority, ready_at));
        tracing::debug!(task_id, delay_ms = delay.as_millis() as u64, "Task requeued");
        Ok(())
    }

    async fn queue_size(&self) -> Result<u64, QueueError> {
        Ok(self.inner.lock().await.entries.len() as u64)
    }

    async fn is_locked(&self, task_id: TaskId) -> Result<bool, QueueError> {
        Ok(self.inner.lock().await.lease_live(task_id, Instant::now()))
    }

    async fn renew_lock(&self, task_id: TaskId) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if !inner.lease_live(task_id, now) {
            return Ok(false);
        }
        inner.leases.insert(task_id, now + self.lease_ttl);
        Ok(true)
    }

    fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    async fn release_lock(&self, task_id: TaskId) -> Result<(), QueueError> {
        self.inner.lock().await.leases.remove(&task_id);
        Ok(())
    }

    async fn contains(&self, task_id: TaskId) -> Result<bool, QueueError> {
        Ok(self.inner.lock().await.index.contains_key(&task_id))
    }
}
