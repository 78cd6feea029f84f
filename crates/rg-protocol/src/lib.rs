//! rg-protocol: Instruction framing for the rdpgate gateway
//!
//! This crate defines the length-prefixed instruction format spoken both by
//! the browser client and by the remote-console daemon, a tokio codec for
//! it, and the opcodes the gateway treats specially.

pub mod codec;
pub mod error;
pub mod instruction;
pub mod opcode;
mod proptest;

pub use codec::{InstructionCodec, DEFAULT_MAX_INSTRUCTION_SIZE};
pub use error::ProtocolError;
pub use instruction::{frame_length, peek_opcode, Instruction};
