//! rdpgate Gateway Daemon
//!
//! Accepts browser WebSocket tunnels and bridges them to the
//! remote-console daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rg_core::config::{self, GatewayConfig};
use rg_core::traits::{PolicyFetcher, RecordingQueue, RouteCache};
use rg_gateway::adapters::{
    self, HttpPolicyFetcher, LogDlpSink, LogMailer, LogRecordingProcessor, MemoryBackend,
    RedisRecordingQueue, RedisRouteCache, TracingAuditSink,
};
use rg_gateway::recording::RecordingWorker;
use rg_gateway::server::{serve_metrics, GatewayServer};
use rg_gateway::{GatewayState, Services};

#[derive(Parser)]
#[command(name = "rdpgate")]
#[command(about = "rdpgate remote-console gateway")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "RDPGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long, env = "RDPGATE_BIND")]
    bind: Option<String>,

    /// Remote-console daemon address (overrides config)
    #[arg(long, env = "RDPGATE_BACKEND")]
    backend: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("rdpgate starting...");

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                GatewayConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            GatewayConfig::default()
        }
    };
    if let Some(backend) = args.backend {
        config.backend_address = backend;
    }
    let bind_addr = args.bind.unwrap_or_else(|| config.bind_address.clone());

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    if let Some(metrics_addr) = config.metrics_address.clone() {
        let handle = rg_gateway::metrics::install_recorder()
            .context("Failed to install metrics recorder")?;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(&metrics_addr, handle, cancel).await {
                tracing::error!("{:#}", e);
            }
        });
    }

    let services = build_services(&config).await?;
    let recordings = Arc::clone(&services.recordings);
    let state = Arc::new(GatewayState::new(config, services));

    // Recording workers, one per configured slot, spread over the shards
    let recording = state.config.recording.clone();
    let mut workers = Vec::with_capacity(recording.workers);
    for slot in 0..recording.workers {
        let worker = RecordingWorker::new(
            Arc::clone(&recordings),
            Arc::new(LogRecordingProcessor),
            slot % recordings.queue_count().max(1),
            &recording,
        );
        workers.push(tokio::spawn(worker.run(cancel.clone())));
    }

    let server = GatewayServer::new(Arc::clone(&state), cancel.clone());
    tracing::info!(
        "Starting gateway on {} (backend {})",
        bind_addr,
        state.config.backend_address
    );
    let result = server.run(&bind_addr).await;

    cancel.cancel();
    for worker in workers {
        let _ = worker.await;
    }

    tracing::info!("Gateway shutdown complete");
    result
}

/// Pick collaborator implementations from the configuration
async fn build_services(config: &GatewayConfig) -> Result<Services> {
    let memory = MemoryBackend::with_queue_count(config.recording.queue_count);
    let mut services = Services::with_backend(Arc::new(memory));

    if let Some(url) = &config.redis.url {
        let redis = adapters::redis::connect(url)
            .await
            .context("Failed to connect to redis")?;
        let prefix = config.redis.key_prefix.clone();
        services.route_cache =
            Arc::new(RedisRouteCache::new(redis.clone(), prefix.clone())) as Arc<dyn RouteCache>;
        services.recordings = Arc::new(RedisRecordingQueue::new(
            redis,
            prefix,
            config.recording.queue_count,
        )) as Arc<dyn RecordingQueue>;
        tracing::info!("Route cache and recording queue backed by redis");
    }

    if let Some(endpoint) = &config.policy.endpoint {
        let fetcher = HttpPolicyFetcher::new(endpoint.as_str(), config.policy.timeout)?;
        services.policy = Arc::new(fetcher) as Arc<dyn PolicyFetcher>;
        tracing::info!("Policy source: {}", endpoint);
    }

    services.audit = Arc::new(TracingAuditSink);
    services.dlp = Arc::new(LogDlpSink);
    services.mailer = Arc::new(LogMailer);
    Ok(services)
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
