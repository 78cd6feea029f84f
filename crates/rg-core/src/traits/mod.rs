//! Interfaces to external collaborators
//!
//! The gateway consumes persistence, caching, queueing, policy, audit and
//! mail through these traits. Implementations are injected at startup.

mod events;
mod persistence;
mod policy;
mod recording;

pub use events::{tags, AuditEvent, AuditSink, DlpJob, DlpSink, Invitation, Mailer};
pub use persistence::{
    ActiveSession, SessionRepository, ShareGrant, TenantRecord, UserDirectory, UserRecord,
};
pub use policy::{PolicyDecision, PolicyFetcher, QuotaPolicy, QuotaRequest};
pub use recording::{RecordingJob, RecordingProcessor, RecordingQueue, RouteCache};
