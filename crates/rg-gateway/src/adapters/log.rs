//! Collaborators that only write to the log.
//!
//! Used when no audit pipeline, DLP scanner, mail relay or encoder is
//! configured.

use async_trait::async_trait;

use rg_core::traits::{
    AuditEvent, AuditSink, DlpJob, DlpSink, Invitation, Mailer, RecordingJob, RecordingProcessor,
};
use rg_core::CollaboratorError;

/// Emits every audit record under the `audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = serde_json::Value::Object(event.details.clone());
        tracing::info!(
            target: "audit",
            tag = %event.tag,
            tenant = %event.tenant_id,
            user = %event.user_id,
            app = %event.app_id,
            session = %event.session_id,
            server = event.server_name.as_deref().unwrap_or(""),
            client_ip = event.client_ip.as_deref().unwrap_or(""),
            details = %details,
            "{}",
            event.tag
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogDlpSink;

#[async_trait]
impl DlpSink for LogDlpSink {
    async fn submit(&self, job: &DlpJob) -> Result<(), CollaboratorError> {
        tracing::info!(
            "DLP {} of {} by {} in session {}",
            job.direction,
            job.file_path,
            job.user_id,
            job.session_id
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_invitation(&self, invitation: &Invitation) -> Result<(), CollaboratorError> {
        tracing::info!(
            "Invitation from {} to {} for {}: {}",
            invitation.from_user,
            invitation.to_user,
            invitation.app_name,
            invitation.url
        );
        Ok(())
    }
}

/// Acknowledges recordings without encoding them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecordingProcessor;

#[async_trait]
impl RecordingProcessor for LogRecordingProcessor {
    async fn process(&self, job: &RecordingJob) -> Result<(), CollaboratorError> {
        tracing::info!(
            "Recording {} of session {} ({}, started {})",
            job.recording_id,
            job.session_id,
            job.app_name,
            job.started_at
        );
        Ok(())
    }
}
