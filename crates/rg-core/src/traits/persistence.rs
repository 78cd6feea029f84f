//! Persistence and directory interfaces

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

/// Record of a live session hosted by this gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub session_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub app_id: String,
    pub app_name: String,
    /// Gateway instance hosting the session
    pub gateway_address: String,
    pub started_at: DateTime<Utc>,
}

/// Standing grant for a user to join a shared session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareGrant {
    pub session_id: String,
    pub user_id: String,
    pub tenant_id: String,
    /// Permission token string, e.g. `"mouse,keyboard"`
    pub permissions: String,
}

/// A user known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    pub tenant_id: String,
    pub display_name: Option<String>,
}

/// A tenant known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRecord {
    pub tenant_id: String,
    /// Subdomain of the tenant's own portal, if any
    pub idp_domain: Option<String>,
}

/// Storage for sessions and share grants
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Record a newly opened session
    async fn save_active_session(&self, session: &ActiveSession) -> Result<(), CollaboratorError>;

    /// Forget a closed session
    async fn delete_active_session(&self, session_id: &str) -> Result<(), CollaboratorError>;

    /// Create or update a grant
    async fn share_session(&self, grant: &ShareGrant) -> Result<(), CollaboratorError>;

    /// Revoke a grant
    async fn remove_invitee(&self, session_id: &str, user_id: &str)
        -> Result<(), CollaboratorError>;

    /// Look up the grant for `user_id` on `session_id`
    async fn get_invitee(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<ShareGrant>, CollaboratorError>;
}

/// User and tenant lookups
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, CollaboratorError>;

    /// Users of `tenant_id` whose id starts with `prefix`
    async fn search_users(
        &self,
        tenant_id: &str,
        prefix: &str,
    ) -> Result<Vec<UserRecord>, CollaboratorError>;

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>, CollaboratorError>;
}
