//! Backend tunnel to the remote-console daemon
//!
//! A [`Tunnel`] owns one backend stream. After the handshake its reader and
//! writer are handed to the bridge pumps; each can be acquired once.

mod handshake;
mod io;

pub use handshake::HandshakeConfig;
pub use io::{BoxedReader, BoxedWriter, InstructionReader, InstructionWriter};

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use uuid::Uuid;

use rg_core::TunnelError;
use rg_protocol::InstructionCodec;

/// One backend connection
pub struct Tunnel {
    id: Uuid,
    connection_id: Option<String>,
    reader: Option<InstructionReader>,
    writer: Option<InstructionWriter>,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl Tunnel {
    /// Dial the backend at `address`
    pub async fn connect(
        address: &str,
        timeout: Duration,
        codec: InstructionCodec,
    ) -> Result<Self, TunnelError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TunnelError::Timeout(timeout))?
            .map_err(|source| TunnelError::Connect {
                address: address.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;

        tracing::debug!("Connected to backend at {}", address);
        Ok(Self::from_stream(stream, timeout, codec))
    }

    /// Wrap an already connected stream
    pub fn from_stream<S>(stream: S, timeout: Duration, codec: InstructionCodec) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            id: Uuid::new_v4(),
            connection_id: None,
            reader: Some(InstructionReader::new(Box::new(read_half), codec, timeout)),
            writer: Some(InstructionWriter::new(Box::new(write_half), timeout)),
        }
    }

    /// Unique id of this tunnel
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Backend connection id, known after the handshake
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Negotiate the connection. Returns the backend connection id.
    pub async fn handshake(&mut self, config: &HandshakeConfig) -> Result<String, TunnelError> {
        let (reader, writer) = match (self.reader.as_mut(), self.writer.as_mut()) {
            (Some(reader), Some(writer)) => (reader, writer),
            _ => return Err(TunnelError::Closed),
        };

        let connection_id = handshake::perform(reader, writer, config).await?;
        tracing::info!(
            "Tunnel {} ready (backend connection {})",
            self.id,
            connection_id
        );
        self.connection_id = Some(connection_id.clone());
        Ok(connection_id)
    }

    /// Take the reader. Returns `None` once acquired.
    pub fn acquire_reader(&mut self) -> Option<InstructionReader> {
        self.reader.take()
    }

    /// Take the writer. Returns `None` once acquired.
    pub fn acquire_writer(&mut self) -> Option<InstructionWriter> {
        self.writer.take()
    }

    /// Close whatever halves are still held
    pub async fn close(mut self) {
        if let Some(writer) = self.writer.as_mut() {
            writer.shutdown().await;
        }
        tracing::debug!("Tunnel {} closed", self.id);
    }
}
