//! Buffered instruction reader and raw writer over a backend stream

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use rg_core::TunnelError;
use rg_protocol::{opcode, Instruction, InstructionCodec};

/// Read half of a backend stream
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a backend stream
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bytes requested from the socket per read
const READ_CHUNK: usize = 8 * 1024;

/// Reads whole instructions from the backend.
///
/// Keeps its own buffer, so it can tell whether another instruction is
/// already available without touching the socket.
pub struct InstructionReader {
    inner: BoxedReader,
    buffer: BytesMut,
    codec: InstructionCodec,
    timeout: Duration,
}

impl InstructionReader {
    pub fn new(inner: BoxedReader, codec: InstructionCodec, timeout: Duration) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            codec,
            timeout,
        }
    }

    /// Next complete instruction as raw wire bytes (valid UTF-8)
    pub async fn read_frame(&mut self) -> Result<Bytes, TunnelError> {
        loop {
            if let Some(frame) = self.codec.decode_frame(&mut self.buffer)? {
                return Ok(frame);
            }

            let timeout = self.timeout;
            self.buffer.reserve(READ_CHUNK);
            let read = tokio::time::timeout(timeout, self.inner.read_buf(&mut self.buffer))
                .await
                .map_err(|_| TunnelError::Timeout(timeout))??;
            if read == 0 {
                return Err(TunnelError::Closed);
            }
        }
    }

    /// Next complete instruction, parsed
    pub async fn read_instruction(&mut self) -> Result<Instruction, TunnelError> {
        let frame = self.read_frame().await?;
        Ok(Instruction::parse(&frame)?)
    }

    /// Next instruction, which must carry `expected` as its opcode.
    ///
    /// An `error` instruction from the backend fails with its message.
    pub async fn expect(&mut self, expected: &str) -> Result<Instruction, TunnelError> {
        let instruction = self.read_instruction().await?;
        if instruction.opcode == expected {
            return Ok(instruction);
        }
        if instruction.opcode == opcode::ERROR {
            return Err(TunnelError::Handshake(format!(
                "backend error: {} (code {})",
                instruction.arg(0).unwrap_or(""),
                instruction.arg(1).unwrap_or("?")
            )));
        }
        Err(TunnelError::Handshake(format!(
            "expected {:?}, received {:?}",
            expected, instruction.opcode
        )))
    }

    /// Whether a complete instruction is already buffered
    pub fn available(&self) -> bool {
        self.codec.has_frame(&self.buffer)
    }
}

/// Writes raw instruction bytes to the backend
pub struct InstructionWriter {
    inner: BoxedWriter,
    timeout: Duration,
}

impl InstructionWriter {
    pub fn new(inner: BoxedWriter, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Write and flush `data` within the socket timeout
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<(), TunnelError> {
        let timeout = self.timeout;
        let inner = &mut self.inner;
        let write = async move {
            inner.write_all(data).await?;
            inner.flush().await
        };
        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| TunnelError::Timeout(timeout))??;
        Ok(())
    }

    pub async fn write_instruction(
        &mut self,
        instruction: &Instruction,
    ) -> Result<(), TunnelError> {
        self.write_raw(instruction.encode().as_bytes()).await
    }

    /// Shut down the write direction
    pub async fn shutdown(&mut self) {
        let _ = tokio::time::timeout(self.timeout, self.inner.shutdown()).await;
    }
}
