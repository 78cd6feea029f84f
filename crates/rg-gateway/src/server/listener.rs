//! HTTP server listener
//!
//! Serves the tunnel and control routes until cancelled, then closes every
//! open room.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::routes::{metrics_router, router};
use crate::state::GatewayState;

/// Gateway HTTP/WebSocket server
pub struct GatewayServer {
    /// Shared gateway state
    state: Arc<GatewayState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl GatewayServer {
    pub fn new(state: Arc<GatewayState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Serve on `bind_addr` until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Gateway listening on {}", local_addr);

        let cancel = self.cancel.clone();
        axum::serve(
            listener,
            router(Arc::clone(&self.state)).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("Gateway server failed")?;

        self.close_rooms().await;
        tracing::info!("Gateway server stopped");
        Ok(())
    }

    async fn close_rooms(&self) {
        let session_ids = self.state.rooms.session_ids();
        if session_ids.is_empty() {
            return;
        }

        tracing::info!("Closing {} open room(s)", session_ids.len());
        for session_id in session_ids {
            self.state.rooms.close(&session_id).await;
        }
    }
}

/// Serve Prometheus metrics on `bind_addr` until cancelled
pub async fn serve_metrics(
    bind_addr: &str,
    handle: PrometheusHandle,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener to {}", bind_addr))?;
    tracing::info!("Metrics available at http://{}/metrics", listener.local_addr()?);

    axum::serve(listener, metrics_router(handle))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("Metrics server failed")
}
