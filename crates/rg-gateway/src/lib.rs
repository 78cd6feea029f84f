//! rg-gateway: Browser-to-remote-console gateway
//!
//! Browser clients connect over a WebSocket tunnel. Each connection is
//! handshaken with the remote-console daemon and bridged to it, under the
//! room of the session it belongs to. Rooms carry the sharing state:
//! invitees, participant permissions and the recording of the session.

pub mod adapters;
pub mod bridge;
pub mod commands;
pub mod metrics;
pub mod notify;
pub mod recording;
pub mod room;
pub mod server;
pub mod services;
pub mod state;
pub mod tunnel;

pub use services::Services;
pub use state::GatewayState;
