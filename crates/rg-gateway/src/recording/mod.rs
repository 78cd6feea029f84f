//! Asynchronous processing of queued session recordings

mod backoff;
mod worker;

pub use backoff::ExponentialBackoff;
pub use worker::RecordingWorker;
