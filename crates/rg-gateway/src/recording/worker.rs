//! Worker draining one recording queue shard

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rg_core::config::RecordingConfig;
use rg_core::traits::{RecordingProcessor, RecordingQueue};
use rg_core::CollaboratorError;

use super::ExponentialBackoff;

/// Processes the jobs of one shard, oldest first.
///
/// A job is only popped once it was processed or ran out of attempts, so a
/// crash mid-job leaves it queued for the next worker.
pub struct RecordingWorker {
    queue: Arc<dyn RecordingQueue>,
    processor: Arc<dyn RecordingProcessor>,
    index: usize,
    poll_interval: Duration,
    max_attempts: u32,
    backoff: ExponentialBackoff,
}

impl RecordingWorker {
    pub fn new(
        queue: Arc<dyn RecordingQueue>,
        processor: Arc<dyn RecordingProcessor>,
        index: usize,
        config: &RecordingConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            index,
            poll_interval: config.poll_interval,
            max_attempts: config.max_attempts.max(1),
            backoff: ExponentialBackoff::from_config(&config.backoff),
        }
    }

    /// Poll the shard until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Recording worker started on queue {}", self.index);
        while !cancel.is_cancelled() {
            match self.process_next(&cancel).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => tracing::warn!("Recording queue {} unavailable: {}", self.index, e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        tracing::info!("Recording worker on queue {} stopped", self.index);
    }

    /// Handle the oldest job, if any. Returns whether a job was consumed.
    ///
    /// An entry that cannot be decoded is discarded so the jobs behind it
    /// keep flowing.
    pub async fn process_next(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<bool, CollaboratorError> {
        let job = match self.queue.peek(self.index).await {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(false),
            Err(CollaboratorError::CorruptJob(reason)) => {
                tracing::error!("Discarding corrupt job on queue {}: {}", self.index, reason);
                self.queue.discard(self.index).await?;
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.processor.process(&job).await {
                Ok(()) => {
                    tracing::info!("Recording {} processed", job.recording_id);
                    break;
                }
                Err(e) if attempt >= self.max_attempts => {
                    tracing::error!(
                        "Dropping recording {} after {} attempts: {}",
                        job.recording_id,
                        attempt,
                        e
                    );
                    break;
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        "Recording {} failed (attempt {}), retrying in {:?}: {}",
                        job.recording_id,
                        attempt,
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(false),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.backoff.reset();
        self.queue.pop(self.index).await?;
        Ok(true)
    }
}
