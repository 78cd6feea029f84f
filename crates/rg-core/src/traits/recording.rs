//! Route cache and recording queue interfaces

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

/// A session recording waiting to be encoded and uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingJob {
    /// Tunnel whose output was recorded
    pub recording_id: String,
    pub session_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub app_name: String,
    pub client_ip: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Maps session ids to the gateway instance hosting them
#[async_trait]
pub trait RouteCache: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CollaboratorError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CollaboratorError>;

    async fn delete(&self, key: &str) -> Result<(), CollaboratorError>;
}

/// Durable, sharded queue of recording jobs.
///
/// Jobs are consumed peek-then-pop so a job survives a worker crash
/// between the two.
#[async_trait]
pub trait RecordingQueue: Send + Sync {
    /// Number of shards
    fn queue_count(&self) -> usize;

    /// Append a job to one of the shards
    async fn enqueue(&self, job: &RecordingJob) -> Result<(), CollaboratorError>;

    /// Oldest job of shard `index`, left in place.
    ///
    /// Fails with [`CollaboratorError::CorruptJob`] when that entry cannot
    /// be decoded.
    async fn peek(&self, index: usize) -> Result<Option<RecordingJob>, CollaboratorError>;

    /// Remove the oldest job of shard `index`
    async fn pop(&self, index: usize) -> Result<(), CollaboratorError>;

    /// Take an undecodable oldest entry out of shard `index`
    async fn discard(&self, index: usize) -> Result<(), CollaboratorError> {
        self.pop(index).await
    }
}

/// Encodes and uploads one recording
#[async_trait]
pub trait RecordingProcessor: Send + Sync {
    async fn process(&self, job: &RecordingJob) -> Result<(), CollaboratorError>;
}
