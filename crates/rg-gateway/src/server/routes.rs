//! HTTP and WebSocket routes

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;

use super::handler::{serve_connection, TunnelParams};
use crate::bridge::{run_writer, BridgeError, ClientHandle};
use crate::state::GatewayState;

/// WebSocket subprotocol spoken by the browser client
pub const SUBPROTOCOL: &str = "guacamole";

/// Routes of the gateway listener
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/websocket-tunnel", get(tunnel_handler))
        .route("/policy", put(policy_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Routes of the metrics listener
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || async move { handle.render() }))
}

async fn tunnel_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(mut query): Query<HashMap<String, String>>,
) -> Response {
    query
        .entry("clientIp".to_string())
        .or_insert_with(|| peer.ip().to_string());

    match TunnelParams::from_query(query) {
        Ok(params) => ws
            .protocols([SUBPROTOCOL])
            .on_upgrade(move |socket| handle_socket(socket, state, params))
            .into_response(),
        Err(e) => {
            tracing::warn!("Bad tunnel request from {}: {}", peer, e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, params: TunnelParams) {
    let (sink, stream) = socket.split();
    let (client, rx) = ClientHandle::new();

    let sink = Box::pin(sink.with(|text: String| async move {
        Ok::<_, axum::Error>(Message::Text(text))
    }));
    let writer = tokio::spawn(run_writer(rx, sink, client.cancel_token()));

    let incoming = Box::pin(stream.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(Ok(text)),
            Ok(Message::Binary(data)) => String::from_utf8(data).ok().map(Ok),
            Ok(Message::Close(_)) => Some(Err(BridgeError::ClientClosed)),
            Ok(Message::Ping(_) | Message::Pong(_)) => None,
            Err(e) => Some(Err(BridgeError::Transport(e.to_string()))),
        }
    }));

    serve_connection(&state, params, client.clone(), incoming).await;
    client.close();
    if let Err(e) = writer.await {
        tracing::debug!("Client writer task failed: {}", e);
    }
}

#[derive(Debug, Deserialize)]
struct PolicyChange {
    #[serde(default)]
    events: Vec<PolicyEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyEvent {
    #[serde(default)]
    type_name: String,
    #[serde(default)]
    ids: Vec<String>,
}

/// Wake the sync loop of every connection subscribed to a changed id
async fn policy_handler(
    State(state): State<Arc<GatewayState>>,
    Json(change): Json<PolicyChange>,
) -> impl IntoResponse {
    let mut signalled = 0;
    for event in &change.events {
        tracing::debug!("Policy change for {} ({} ids)", event.type_name, event.ids.len());
        for id in &event.ids {
            signalled += state.notifications.broadcast(id);
        }
    }
    Json(json!({ "ok": true, "signalled": signalled }))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "rooms": state.rooms.len(),
        "sessions": state.sessions.len(),
    }))
}
