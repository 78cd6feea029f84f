//! Audit, DLP and mail interfaces

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CollaboratorError;
use crate::session::SessionContext;
use crate::types::TransferAction;

/// Audit tags emitted by the gateway
pub mod tags {
    pub const OPEN: &str = "rdp.open";
    pub const EXIT: &str = "rdp.exit";
    pub const LEAVE: &str = "rdp.leave";
    pub const DOWNLOAD: &str = "rdp.download";
    pub const UPLOAD: &str = "rdp.upload";
    pub const UNHANDLED_OP: &str = "rdp.unhandled-op";

    /// Tag for a transfer refused by policy, e.g. `rdp.download.block`
    pub fn blocked(action: &str) -> String {
        format!("rdp.{}.block", action)
    }
}

/// One structured audit record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub tag: String,
    pub session_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub app_id: String,
    pub app_name: String,
    pub server_name: Option<String>,
    pub client_ip: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl AuditEvent {
    /// Event carrying the identity of `ctx`
    pub fn for_session(tag: impl Into<String>, ctx: &SessionContext) -> Self {
        let identity = ctx.identity();
        Self {
            tag: tag.into(),
            session_id: identity.session_id.clone(),
            tenant_id: identity.tenant_id.clone(),
            user_id: identity.user_id.clone(),
            app_id: identity.app_id.clone(),
            app_name: identity.app_name.clone(),
            server_name: ctx.server_name(),
            client_ip: identity.client_ip.clone(),
            at: Utc::now(),
            details: Map::new(),
        }
    }

    /// Attribute the event to another user of the same session
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Receives audit records. Recording must not block the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// A file transfer to be inspected by data-loss prevention
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DlpJob {
    pub tenant_id: String,
    pub app_id: String,
    pub session_id: String,
    pub user_id: String,
    pub direction: TransferAction,
    pub file_name: String,
    pub file_path: String,
    /// Client context reported by the browser, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<Value>,
}

#[async_trait]
pub trait DlpSink: Send + Sync {
    async fn submit(&self, job: &DlpJob) -> Result<(), CollaboratorError>;
}

/// Invitation to join a shared session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub session_id: String,
    pub tenant_id: String,
    pub from_user: String,
    pub to_user: String,
    pub app_name: String,
    pub url: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_invitation(&self, invitation: &Invitation) -> Result<(), CollaboratorError>;
}
