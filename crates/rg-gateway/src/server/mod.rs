//! Client-facing server
//!
//! - `handler`: admission of tunnel requests into rooms
//! - `routes`: HTTP and WebSocket routes
//! - `listener`: the listening servers

mod handler;
mod listener;
mod routes;

pub use handler::{admit, serve_connection, SetupError, TunnelParams};
pub use listener::{serve_metrics, GatewayServer};
pub use routes::{metrics_router, router, SUBPROTOCOL};
