//! Policy interfaces

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::types::TransferAction;

/// Outcome of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDecision {
    /// Proceed silently
    Allow,
    /// Proceed after the user confirms
    Prompt,
    /// Refuse
    Deny,
}

/// A transfer to be checked against quota rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRequest {
    pub tenant_id: String,
    pub app_id: String,
    pub user_id: String,
    pub action: TransferAction,
    /// Files in this transfer
    pub count: u64,
    /// Files already transferred in this session
    pub accumulated: u64,
}

/// Evaluates transfers against frequency/quota rules
#[async_trait]
pub trait QuotaPolicy: Send + Sync {
    async fn check(&self, request: &QuotaRequest) -> Result<PolicyDecision, CollaboratorError>;
}

/// Source of the actions a user may perform in an application.
///
/// `Ok(None)` means nothing is known yet and no sync should be pushed.
#[async_trait]
pub trait PolicyFetcher: Send + Sync {
    async fn fetch_actions(
        &self,
        app_id: &str,
        user_id: &str,
    ) -> Result<Option<Vec<String>>, CollaboratorError>;
}
