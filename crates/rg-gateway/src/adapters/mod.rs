//! Implementations of the collaborator traits

mod http;
mod log;
mod memory;
pub mod redis;

pub use self::http::HttpPolicyFetcher;
pub use self::log::{LogDlpSink, LogMailer, LogRecordingProcessor, TracingAuditSink};
pub use self::memory::{MemoryBackend, StaticPolicy};
pub use self::redis::{RedisRecordingQueue, RedisRouteCache};
