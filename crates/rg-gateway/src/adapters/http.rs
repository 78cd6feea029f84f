//! Policy actions fetched from a remote policy service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use rg_core::traits::PolicyFetcher;
use rg_core::CollaboratorError;

#[derive(Debug, Deserialize)]
struct PolicyResponse {
    #[serde(default)]
    actions: Vec<String>,
}

/// `GET {endpoint}/policy?appId=..&userId=..` returning `{"actions": [...]}`
#[derive(Clone)]
pub struct HttpPolicyFetcher {
    http: Client,
    endpoint: String,
}

impl HttpPolicyFetcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Policy(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

fn policy_error(e: reqwest::Error) -> CollaboratorError {
    if e.is_timeout() || e.is_connect() {
        CollaboratorError::Unavailable(e.to_string())
    } else {
        CollaboratorError::Policy(e.to_string())
    }
}

#[async_trait]
impl PolicyFetcher for HttpPolicyFetcher {
    async fn fetch_actions(
        &self,
        app_id: &str,
        user_id: &str,
    ) -> Result<Option<Vec<String>>, CollaboratorError> {
        let url = format!("{}/policy", self.endpoint);
        let res = self
            .http
            .get(url)
            .query(&[("appId", app_id), ("userId", user_id)])
            .send()
            .await
            .map_err(policy_error)?;

        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = res.json::<PolicyResponse>().await.map_err(policy_error)?;
                Ok(Some(body.actions))
            }
            status => {
                let body = res.text().await.unwrap_or_default();
                Err(CollaboratorError::Policy(format!(
                    "unexpected status {}: {}",
                    status, body
                )))
            }
        }
    }
}
