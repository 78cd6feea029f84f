//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the gateway daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind the HTTP/WebSocket server to
    pub bind_address: String,

    /// Address of the remote-console daemon
    pub backend_address: String,

    /// Address other gateway instances use to reach this one
    pub advertised_address: String,

    /// Read/write timeout on backend streams
    #[serde(with = "duration_secs")]
    pub socket_timeout: Duration,

    /// Flush threshold for batched backend output, in bytes
    pub max_batch_size: usize,

    /// Largest instruction accepted from the backend, in bytes
    pub max_instruction_size: usize,

    /// Maximum number of invitees per room, excluding the creator
    pub invitee_limit: usize,

    /// Portal host used in invitation links
    pub portal_hostname: String,

    /// Lifetime of route cache entries
    #[serde(with = "duration_secs")]
    pub route_ttl: Duration,

    /// Root of the shared drive as mounted on this host
    pub drive_root: Option<PathBuf>,

    /// Audio mimetypes offered during the handshake
    pub audio_mimetypes: Vec<String>,

    /// Video mimetypes offered during the handshake
    pub video_mimetypes: Vec<String>,

    /// Image mimetypes offered during the handshake
    pub image_mimetypes: Vec<String>,

    /// Prometheus exporter listen address
    pub metrics_address: Option<String>,

    /// Redis connection used for the route cache and recording queue
    pub redis: RedisConfig,

    /// Remote policy source
    pub policy: PolicyConfig,

    /// Recording queue and workers
    pub recording: RecordingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            backend_address: "127.0.0.1:4822".to_string(),
            advertised_address: "127.0.0.1:8080".to_string(),
            socket_timeout: Duration::from_secs(15),
            max_batch_size: 8192,
            max_instruction_size: 8192,
            invitee_limit: 4,
            portal_hostname: "portal.localhost".to_string(),
            route_ttl: Duration::from_secs(24 * 60 * 60),
            drive_root: None,
            audio_mimetypes: vec!["audio/L8".to_string(), "audio/L16".to_string()],
            video_mimetypes: Vec::new(),
            image_mimetypes: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            metrics_address: None,
            redis: RedisConfig::default(),
            policy: PolicyConfig::default(),
            recording: RecordingConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Invitation link for a shared session, optionally on a tenant's own
    /// portal domain.
    ///
    /// The tenant domain replaces the first label of `portal_hostname`, so
    /// `portal.example.com` becomes `acme.example.com`.
    pub fn share_url(&self, session_id: &str, tenant_domain: Option<&str>) -> String {
        let host = match (tenant_domain, self.portal_hostname.split_once('.')) {
            (Some(domain), Some((_, rest))) if !domain.is_empty() => format!("{}.{}", domain, rest),
            _ => self.portal_hostname.clone(),
        };
        format!("https://{}/share_session?shareSessionId={}", host, session_id)
    }
}

/// Redis connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`. Unset keeps state in memory.
    pub url: Option<String>,

    /// Prefix for every key written by this deployment
    pub key_prefix: Option<String>,
}

/// Remote policy source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Base URL of the policy service
    pub endpoint: Option<String>,

    /// Request timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Recording queue and worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Number of queue shards jobs are spread across
    pub queue_count: usize,

    /// Worker tasks started by this process (0 disables processing)
    pub workers: usize,

    /// Delay between polls of an empty queue
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,

    /// Attempts per job before it is dropped
    pub max_attempts: u32,

    /// Retry delays between attempts
    pub backoff: BackoffConfig,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            queue_count: 1,
            workers: 0,
            poll_interval: Duration::from_secs(5),
            max_attempts: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.invitee_limit, 4);
        assert_eq!(config.max_batch_size, 8192);
        assert_eq!(config.socket_timeout, Duration::from_secs(15));
        assert!(config.redis.url.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            backend_address = "guacd:4822"
            socket_timeout = 30

            [recording]
            workers = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.backend_address, "guacd:4822");
        assert_eq!(config.socket_timeout, Duration::from_secs(30));
        assert_eq!(config.recording.workers, 2);
        assert_eq!(config.recording.max_attempts, 5);
        assert_eq!(config.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_share_url() {
        let config = GatewayConfig {
            portal_hostname: "portal.example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.share_url("abc", None),
            "https://portal.example.com/share_session?shareSessionId=abc"
        );
        assert_eq!(
            config.share_url("abc", Some("acme")),
            "https://acme.example.com/share_session?shareSessionId=abc"
        );
        assert_eq!(
            config.share_url("abc", Some("")),
            "https://portal.example.com/share_session?shareSessionId=abc"
        );
    }
}
