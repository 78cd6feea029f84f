//! Connection bridge between a client transport and a backend tunnel
//!
//! Each connection runs two pumps. Client to backend filters reserved and
//! unpermitted frames and routes side-channel commands to the dispatcher.
//! Backend to client drops internal frames, intercepts the session-opened
//! notice and batches the rest. When either pump ends the connection is
//! torn down exactly once.

mod client;
mod connection;
mod pump;

pub use client::{run_writer, ClientHandle};
pub use connection::{Bridge, Connection};
pub use pump::{classify, Route};

use thiserror::Error;

use rg_core::TunnelError;

/// Why a bridge pump stopped
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Backend read or write failed
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Client transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Client transport is closed
    #[error("Client closed")]
    ClientClosed,
}
