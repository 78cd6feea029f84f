//! Instruction values and element framing
//!
//! An instruction is a list of elements. Each element is written as
//! `<len>.<payload>` where `<len>` is the byte length of the UTF-8 payload,
//! elements are joined with `,` and the instruction ends with `;`:
//!
//! ```text
//! 4.size,1.0,4.1024,3.768;
//! ```
//!
//! The first element is the opcode. Because every payload is length
//! prefixed, payloads may freely contain `,`, `;` and `.`.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;

/// Separates the length prefix from the element payload
pub const LENGTH_SEPARATOR: u8 = b'.';

/// Separates elements within an instruction
pub const ELEMENT_SEPARATOR: u8 = b',';

/// Terminates an instruction
pub const INSTRUCTION_TERMINATOR: u8 = b';';

/// Longest accepted decimal length prefix
const MAX_LENGTH_DIGITS: usize = 9;

/// One parsed protocol instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// First element of the instruction
    pub opcode: String,
    /// Remaining elements, in wire order
    pub args: Vec<String>,
}

impl Instruction {
    /// Create an instruction from an opcode and arguments
    pub fn new<I, S>(opcode: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            opcode: opcode.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Argument at `index`, if present
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Number of bytes this instruction occupies on the wire
    pub fn encoded_len(&self) -> usize {
        std::iter::once(&self.opcode)
            .chain(self.args.iter())
            .map(|element| decimal_width(element.len()) + 1 + element.len() + 1)
            .sum()
    }

    /// Append the wire form of this instruction to `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        put_element(dst, &self.opcode);
        for arg in &self.args {
            dst.put_u8(ELEMENT_SEPARATOR);
            put_element(dst, arg);
        }
        dst.put_u8(INSTRUCTION_TERMINATOR);
    }

    /// Wire form of this instruction as a string
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.encoded_len());
        push_element(&mut out, &self.opcode);
        for arg in &self.args {
            out.push(ELEMENT_SEPARATOR as char);
            push_element(&mut out, arg);
        }
        out.push(INSTRUCTION_TERMINATOR as char);
        out
    }

    /// Parse exactly one instruction from `frame`.
    ///
    /// Fails if the input is truncated, malformed, or carries bytes past
    /// the terminator.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut elements = Vec::new();
        let mut pos = 0;

        loop {
            let (payload, next) = match read_element(frame, pos)? {
                Some(found) => found,
                None => return Err(ProtocolError::Incomplete),
            };
            elements.push(std::str::from_utf8(payload)?.to_string());

            match frame.get(next) {
                Some(&ELEMENT_SEPARATOR) => pos = next + 1,
                Some(&INSTRUCTION_TERMINATOR) => {
                    let consumed = next + 1;
                    if consumed != frame.len() {
                        return Err(ProtocolError::TrailingData(frame.len() - consumed));
                    }
                    break;
                }
                Some(&found) => {
                    return Err(ProtocolError::UnexpectedDelimiter {
                        found,
                        offset: next,
                    })
                }
                None => return Err(ProtocolError::Incomplete),
            }
        }

        let mut elements = elements.into_iter();
        let opcode = elements.next().unwrap_or_default();
        Ok(Self {
            opcode,
            args: elements.collect(),
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Instruction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}

/// Length of the first complete instruction in `buf`, including its
/// terminator.
///
/// Returns `Ok(None)` when more bytes are needed. Payload bytes are skipped
/// by their declared length, so delimiters inside payloads never end an
/// element early.
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let mut pos = 0;
    loop {
        let next = match read_element(buf, pos)? {
            Some((_, next)) => next,
            None => return Ok(None),
        };
        match buf.get(next) {
            Some(&ELEMENT_SEPARATOR) => pos = next + 1,
            Some(&INSTRUCTION_TERMINATOR) => return Ok(Some(next + 1)),
            Some(&found) => {
                return Err(ProtocolError::UnexpectedDelimiter {
                    found,
                    offset: next,
                })
            }
            None => return Ok(None),
        }
    }
}

/// Opcode of the instruction at the start of `frame`, without parsing the
/// rest of it.
pub fn peek_opcode(frame: &[u8]) -> Option<&str> {
    match read_element(frame, 0) {
        Ok(Some((payload, _))) => std::str::from_utf8(payload).ok(),
        _ => None,
    }
}

/// Read the element starting at `pos`.
///
/// Returns the payload slice and the offset just past it, or `None` when
/// the buffer ends first.
fn read_element(buf: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>, ProtocolError> {
    let digits_start = pos;
    let mut cursor = pos;
    while cursor < buf.len() && buf[cursor].is_ascii_digit() {
        cursor += 1;
        if cursor - digits_start > MAX_LENGTH_DIGITS {
            return Err(invalid_length(&buf[digits_start..cursor]));
        }
    }

    if cursor == buf.len() {
        return Ok(None);
    }
    if cursor == digits_start || buf[cursor] != LENGTH_SEPARATOR {
        return Err(invalid_length(&buf[digits_start..=cursor]));
    }

    let digits = &buf[digits_start..cursor];
    let length: usize = std::str::from_utf8(digits)
        .ok()
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| invalid_length(digits))?;

    let payload_start = cursor + 1;
    let payload_end = payload_start + length;
    if payload_end > buf.len() {
        return Ok(None);
    }
    Ok(Some((&buf[payload_start..payload_end], payload_end)))
}

fn invalid_length(raw: &[u8]) -> ProtocolError {
    ProtocolError::InvalidLength(String::from_utf8_lossy(raw).into_owned())
}

fn put_element(dst: &mut BytesMut, element: &str) {
    dst.put_slice(element.len().to_string().as_bytes());
    dst.put_u8(LENGTH_SEPARATOR);
    dst.put_slice(element.as_bytes());
}

fn push_element(out: &mut String, element: &str) {
    out.push_str(&element.len().to_string());
    out.push(LENGTH_SEPARATOR as char);
    out.push_str(element);
}

fn decimal_width(mut n: usize) -> usize {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}
