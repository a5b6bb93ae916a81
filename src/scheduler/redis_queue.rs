//! Redis-backed priority queue with processing leases.
//!
//! # Key Structure
//!
//! - `{queue_key}`: sorted set of task ids scored by priority and ready time
//! - `{lock_prefix}{task_id}`: lease string holding the owner identity, with
//!   a TTL
//!
//! # Atomicity
//!
//! Dequeue runs as a single Lua script so the peek, removal, lease
//! acquisition and reinsertion cannot interleave with another worker.
//! Requeue releases the lease and re-adds the entry in one MULTI/EXEC.
//!
//! The script derives the lease key from the popped member, so it touches a
//! key that is not declared up front. That is fine on a single Redis node but
//! not under Redis Cluster.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, error};
use uuid::Uuid;

use super::queue::{
    now_millis, queue_score, QueueError, TaskQueue, DEFAULT_LEASE_TTL, DEFAULT_LOCK_PREFIX,
    DEFAULT_QUEUE_KEY, PRIORITY_MULTIPLIER,
};
use super::task::{TaskId, TaskPriority};

/// KEYS[1] queue key
/// ARGV[1] now millis, ARGV[2] priority multiplier, ARGV[3] lock prefix,
/// ARGV[4] lease owner, ARGV[5] lease TTL seconds
const DEQUEUE_SCRIPT: &str = r#"
local head = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if #head == 0 then
    return nil
end
local member = head[1]
local score = head[2]
local ready_at = tonumber(score) % tonumber(ARGV[2])
if ready_at > tonumber(ARGV[1]) then
    return nil
end
redis.call('ZREM', KEYS[1], member)
local acquired = redis.call('SET', ARGV[3] .. member, ARGV[4], 'NX', 'EX', tonumber(ARGV[5]))
if not acquired then
    redis.call('ZADD', KEYS[1], score, member)
    return nil
end
return member
"#;

/// KEYS[1] lease key
/// ARGV[1] lease owner, ARGV[2] lease TTL seconds
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], tonumber(ARGV[2]))
end
return 0
"#;

/// Redis implementation of [`TaskQueue`].
pub struct RedisTaskQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    queue_key: String,
    lock_prefix: String,
    lease_ttl: Duration,
    /// Value written into lease keys.
    owner: String,
    dequeue_script: redis::Script,
    renew_script: redis::Script,
}

impl RedisTaskQueue {
    /// Connects to Redis with the default key names and lease TTL.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis))
    }

    /// Creates a queue from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self {
            redis,
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            lock_prefix: DEFAULT_LOCK_PREFIX.to_string(),
            lease_ttl: DEFAULT_LEASE_TTL,
            owner: default_owner(),
            dequeue_script: redis::Script::new(DEQUEUE_SCRIPT),
            renew_script: redis::Script::new(RENEW_SCRIPT),
        }
    }

    /// Sets the sorted-set key.
    pub fn with_queue_key(mut self, key: impl Into<String>) -> Self {
        self.queue_key = key.into();
        self
    }

    /// Sets the lease key prefix.
    pub fn with_lock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = prefix.into();
        self
    }

    /// Sets the lease TTL. Redis expiries have second granularity; values
    /// below one second are rounded up.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    /// Deletes the queue key. Leases are left to expire.
    pub async fn purge(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        redis::cmd("DEL")
            .arg(&self.queue_key)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    fn lock_key(&self, task_id: TaskId) -> String {
        format!("{}{}", self.lock_prefix, task_id)
    }

    fn lease_ttl_secs(&self) -> u64 {
        self.lease_ttl.as_secs().max(1)
    }
}

/// `hostname-xxxxxxxx`, unique per process.
fn default_owner() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task_id: TaskId, priority: TaskPriority) -> Result<(), QueueError> {
        let score = queue_score(priority, now_millis());
        let mut conn = self.redis.clone();
        redis::cmd("ZADD")
            .arg(&self.queue_key)
            .arg(score)
            .arg(task_id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        debug!(task_id, priority = %priority, score, "Task enqueued");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<TaskId>, QueueError> {
        let mut conn = self.redis.clone();

        let mut invocation = self.dequeue_script.prepare_invoke();
        invocation
            .key(&self.queue_key)
            .arg(now_millis())
            .arg(PRIORITY_MULTIPLIER)
            .arg(&self.lock_prefix)
            .arg(&self.owner)
            .arg(self.lease_ttl_secs());
        let member: Option<String> = invocation.invoke_async(&mut conn).await?;

        let Some(member) = member else {
            return Ok(None);
        };

        match member.parse::<TaskId>() {
            Ok(task_id) => Ok(Some(task_id)),
            Err(_) => {
                // The entry is already gone; drop the lease taken on it too.
                error!(member = %member, queue = %self.queue_key, "Discarding non-numeric queue member");
                redis::cmd("DEL")
                    .arg(format!("{}{}", self.lock_prefix, member))
                    .query_async::<_, ()>(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn requeue_with_delay(
        &self,
        task_id: TaskId,
        priority: TaskPriority,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let score = queue_score(priority, now_millis() + delay.as_millis() as u64);
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("DEL")
            .arg(self.lock_key(task_id))
            .ignore()
            .cmd("ZADD")
            .arg(&self.queue_key)
            .arg(score)
            .arg(task_id)
            .ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!(task_id, delay_ms = delay.as_millis() as u64, "Task requeued");
        Ok(())
    }

    async fn queue_size(&self) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();
        let size: u64 = redis::cmd("ZCARD")
            .arg(&self.queue_key)
            .query_async(&mut conn)
            .await?;
        Ok(size)
    }

    async fn is_locked(&self, task_id: TaskId) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(self.lock_key(task_id))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn renew_lock(&self, task_id: TaskId) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let mut invocation = self.renew_script.prepare_invoke();
        invocation
            .key(self.lock_key(task_id))
            .arg(&self.owner)
            .arg(self.lease_ttl_secs());
        let renewed: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(renewed == 1)
    }

    fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    async fn release_lock(&self, task_id: TaskId) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        redis::cmd("DEL")
            .arg(self.lock_key(task_id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn contains(&self, task_id: TaskId) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(&self.queue_key)
            .arg(task_id)
            .query_async(&mut conn)
            .await?;
        Ok(score.is_some())
    }
}
