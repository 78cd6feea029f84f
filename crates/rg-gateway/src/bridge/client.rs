//! Outbound side of a client transport
//!
//! Every writer to one client (the backend pump, command responses, room
//! pushes, policy syncs) goes through a [`ClientHandle`]. A single writer
//! task drains the queue into the transport, so messages never interleave.

use std::fmt::Display;

use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rg_protocol::Instruction;

use super::BridgeError;

/// Queue depth of a client's outbound channel
const OUTBOUND_QUEUE: usize = 1024;

/// Cloneable handle to one client connection
#[derive(Clone)]
pub struct ClientHandle {
    id: Uuid,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl ClientHandle {
    /// Create a handle and the receiving end for [`run_writer`]
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let handle = Self {
            id: Uuid::new_v4(),
            tx,
            cancel: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Connection identity, distinct for every transport
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue one text message, waiting for room in the queue
    pub async fn send_text(&self, text: String) -> Result<(), BridgeError> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::ClientClosed);
        }
        self.tx
            .send(text)
            .await
            .map_err(|_| BridgeError::ClientClosed)
    }

    pub async fn send(&self, instruction: &Instruction) -> Result<(), BridgeError> {
        self.send_text(instruction.encode()).await
    }

    /// Queue without waiting. Used for pushes issued while holding room state.
    pub fn try_send(&self, instruction: &Instruction) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.tx.try_send(instruction.encode()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    "Outbound queue full for client {}, dropping {:?}",
                    self.id,
                    instruction.opcode
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Close the transport. Queued messages are still flushed.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the transport is closed
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn same_connection(&self, other: &ClientHandle) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drain `rx` into `sink` until the handle is closed or the sink fails
pub async fn run_writer<S>(mut rx: mpsc::Receiver<String>, mut sink: S, cancel: CancellationToken)
where
    S: Sink<String> + Unpin,
    S::Error: Display,
{
    loop {
        tokio::select! {
            biased;

            message = rx.recv() => {
                let Some(text) = message else { break };
                if let Err(e) = sink.send(text).await {
                    tracing::debug!("Client transport write failed: {}", e);
                    cancel.cancel();
                    return;
                }
            }

            _ = cancel.cancelled() => {
                while let Ok(text) = rx.try_recv() {
                    if sink.send(text).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    cancel.cancel();
    let _ = sink.close().await;
}
