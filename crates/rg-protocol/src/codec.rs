//! Tokio codec for instruction streams

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::instruction::{frame_length, Instruction};

/// Largest instruction accepted from a peer, in bytes
pub const DEFAULT_MAX_INSTRUCTION_SIZE: usize = 8192;

/// Codec splitting a byte stream into instructions
#[derive(Debug, Clone)]
pub struct InstructionCodec {
    max_size: usize,
}

impl InstructionCodec {
    /// Create a codec with the default size limit
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_INSTRUCTION_SIZE)
    }

    /// Create a codec with a custom size limit
    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Size limit for a single instruction
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Split the next complete instruction off `src` without parsing it.
    ///
    /// The returned bytes are checked to be UTF-8 so they can be relayed
    /// as text.
    pub fn decode_frame(&self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        match frame_length(src)? {
            Some(len) if len > self.max_size => Err(ProtocolError::InstructionTooLarge {
                size: len,
                max: self.max_size,
            }),
            Some(len) => {
                let frame = src.split_to(len).freeze();
                std::str::from_utf8(&frame)?;
                Ok(Some(frame))
            }
            None if src.len() > self.max_size => Err(ProtocolError::InstructionTooLarge {
                size: src.len(),
                max: self.max_size,
            }),
            None => Ok(None),
        }
    }

    /// Whether `src` already holds a complete instruction
    pub fn has_frame(&self, src: &[u8]) -> bool {
        matches!(frame_length(src), Ok(Some(_)))
    }
}

impl Default for InstructionCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for InstructionCodec {
    type Item = Instruction;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode_frame(src)? {
            Some(frame) => Instruction::parse(&frame).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Instruction> for InstructionCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Instruction, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = item.encoded_len();
        if size > self.max_size {
            return Err(ProtocolError::InstructionTooLarge {
                size,
                max: self.max_size,
            });
        }
        item.encode_into(dst);
        Ok(())
    }
}
