//! Protocol-level errors for message encode/decode.
//!
//! Each variant carries the specific context needed to diagnose a bad
//! buffer: what was expected, what was found, and where.

use thiserror::Error;
use types::{DataType, MsgClass};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Encode ran past the end of a fixed-capacity transport buffer.
    #[error("buffer too small: need {need} bytes, capacity {capacity} (context: {context})")]
    BufferTooSmall {
        need: usize,
        capacity: usize,
        context: &'static str,
    },

    /// Decode needed more bytes than the buffer holds.
    #[error("truncated input at offset {offset}: need {need} more bytes, {remaining} remain (context: {context})")]
    Truncated {
        offset: usize,
        need: usize,
        remaining: usize,
        context: &'static str,
    },

    /// A message handed to the wrong decoder.
    #[error("unexpected message class: expected {expected:?}, got {got:?}")]
    UnexpectedMsgClass { expected: MsgClass, got: MsgClass },

    /// A well-known element name arrived with the wrong declared type.
    #[error("wrong type for element \"{name}\": expected {expected:?}, got {got:?}")]
    WrongElementType {
        name: String,
        expected: DataType,
        got: DataType,
    },

    /// A single-byte wire tag did not map to any known enum value.
    #[error("unknown wire tag {tag:#04x} for {what} at offset {offset}")]
    UnknownTag {
        tag: u8,
        what: &'static str,
        offset: usize,
    },

    /// A field identifier not present in the loaded dictionary.
    #[error("unknown field id {fid}")]
    UnknownFieldId { fid: i16 },

    /// A container's declared length ran past the enclosing buffer.
    #[error("container overrun at offset {offset}: declared {declared} bytes, {remaining} remain")]
    ContainerOverrun {
        offset: usize,
        declared: usize,
        remaining: usize,
    },

    /// A required sub-structure was absent.
    #[error("missing required {what}")]
    Missing { what: &'static str },

    /// General decode error with positional context.
    #[error("decode error at offset {offset}: {description}")]
    Decode {
        offset: usize,
        description: String,
    },
}

impl CodecError {
    pub fn buffer_too_small(need: usize, capacity: usize, context: &'static str) -> Self {
        Self::BufferTooSmall {
            need,
            capacity,
            context,
        }
    }

    pub fn truncated(offset: usize, need: usize, remaining: usize, context: &'static str) -> Self {
        Self::Truncated {
            offset,
            need,
            remaining,
            context,
        }
    }

    pub fn wrong_element_type(name: &[u8], expected: DataType, got: DataType) -> Self {
        Self::WrongElementType {
            name: String::from_utf8_lossy(name).into_owned(),
            expected,
            got,
        }
    }

    pub fn decode(offset: usize, description: impl Into<String>) -> Self {
        Self::Decode {
            offset,
            description: description.into(),
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
