//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing or parsing instructions
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Element length prefix is missing, non-numeric or too long
    #[error("Invalid element length prefix: {0:?}")]
    InvalidLength(String),

    /// An element was followed by something other than `,` or `;`
    #[error("Unexpected byte {found:#04x} after element at offset {offset}")]
    UnexpectedDelimiter { found: u8, offset: usize },

    /// Input ended before the instruction terminator
    #[error("Incomplete instruction")]
    Incomplete,

    /// Bytes remain after the instruction terminator
    #[error("Trailing data after instruction: {0} bytes")]
    TrailingData(usize),

    /// Element payload is not valid UTF-8
    #[error("Invalid UTF-8 in element: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Instruction exceeds the configured maximum size
    #[error("Instruction too large: {size} bytes exceeds maximum of {max} bytes")]
    InstructionTooLarge { size: usize, max: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
