//! Redis-backed route cache and recording queue

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use rg_core::traits::{RecordingJob, RecordingQueue, RouteCache};
use rg_core::CollaboratorError;

fn key_with_prefix(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, key),
        _ => key.to_string(),
    }
}

/// Open a managed connection to `url`
pub async fn connect(url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let client = Client::open(url)?;
    ConnectionManager::new(client).await
}

/// Session routes kept as expiring string keys
#[derive(Clone)]
pub struct RedisRouteCache {
    redis: ConnectionManager,
    prefix: Option<String>,
}

impl RedisRouteCache {
    pub fn new(redis: ConnectionManager, prefix: Option<String>) -> Self {
        Self { redis, prefix }
    }

    fn key(&self, key: &str) -> String {
        key_with_prefix(self.prefix.as_deref(), key)
    }
}

fn cache_error(e: redis::RedisError) -> CollaboratorError {
    CollaboratorError::Cache(e.to_string())
}

#[async_trait]
impl RouteCache for RedisRouteCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CollaboratorError> {
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1))
            .await
            .map_err(cache_error)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CollaboratorError> {
        let mut conn = self.redis.clone();
        conn.get::<_, Option<String>>(self.key(key))
            .await
            .map_err(cache_error)
    }

    async fn delete(&self, key: &str) -> Result<(), CollaboratorError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(self.key(key)).await.map_err(cache_error)
    }
}

/// Recording jobs spread round-robin over `recording-queue-<n>` lists.
///
/// Jobs are pushed on the left and consumed from the right.
#[derive(Clone)]
pub struct RedisRecordingQueue {
    redis: ConnectionManager,
    prefix: Option<String>,
    queue_count: usize,
    next: std::sync::Arc<AtomicUsize>,
}

impl RedisRecordingQueue {
    pub fn new(redis: ConnectionManager, prefix: Option<String>, queue_count: usize) -> Self {
        Self {
            redis,
            prefix,
            queue_count: queue_count.max(1),
            next: std::sync::Arc::new(AtomicUsize::new(0)),
        }
    }

    fn queue_key(&self, index: usize) -> String {
        key_with_prefix(self.prefix.as_deref(), &format!("recording-queue-{}", index))
    }

    fn check_index(&self, index: usize) -> Result<(), CollaboratorError> {
        if index >= self.queue_count {
            return Err(CollaboratorError::Queue(format!("no queue {}", index)));
        }
        Ok(())
    }
}

fn queue_error(e: redis::RedisError) -> CollaboratorError {
    CollaboratorError::Queue(e.to_string())
}

#[async_trait]
impl RecordingQueue for RedisRecordingQueue {
    fn queue_count(&self) -> usize {
        self.queue_count
    }

    async fn enqueue(&self, job: &RecordingJob) -> Result<(), CollaboratorError> {
        let payload =
            serde_json::to_string(job).map_err(|e| CollaboratorError::Queue(e.to_string()))?;
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.queue_count;

        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(self.queue_key(index), payload)
            .await
            .map_err(queue_error)?;
        tracing::debug!("Queued recording {} on shard {}", job.recording_id, index);
        Ok(())
    }

    async fn peek(&self, index: usize) -> Result<Option<RecordingJob>, CollaboratorError> {
        self.check_index(index)?;
        let mut conn = self.redis.clone();
        let raw = conn
            .lindex::<_, Option<String>>(self.queue_key(index), -1)
            .await
            .map_err(queue_error)?;

        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CollaboratorError::CorruptJob(e.to_string())),
            None => Ok(None),
        }
    }

    async fn pop(&self, index: usize) -> Result<(), CollaboratorError> {
        self.check_index(index)?;
        let mut conn = self.redis.clone();
        conn.rpop::<_, Option<String>>(self.queue_key(index), None)
            .await
            .map_err(queue_error)?;
        Ok(())
    }

    /// Moves the entry to `recording-queue-<n>-dead` for inspection
    async fn discard(&self, index: usize) -> Result<(), CollaboratorError> {
        self.check_index(index)?;
        let key = self.queue_key(index);
        let mut conn = self.redis.clone();
        conn.rpoplpush::<_, _, Option<String>>(&key, format!("{}-dead", key))
            .await
            .map_err(queue_error)?;
        Ok(())
    }
}
