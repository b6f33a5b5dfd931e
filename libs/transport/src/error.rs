//! Transport-level errors.
//!
//! `NoBuffers` is the one recoverable variant: callers count it and retry
//! on the next scheduling tick. Everything else is fatal for the channel.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// Buffer pool exhausted; retry after outstanding buffers drain.
    #[error("no buffers available (requested {requested} bytes, {outstanding} outstanding)")]
    NoBuffers { requested: usize, outstanding: usize },

    /// Requested buffer exceeds what the channel can ever grant.
    #[error("buffer request of {requested} bytes exceeds channel maximum {max}")]
    BufferTooLarge { requested: usize, max: usize },

    /// Peer went away.
    #[error("channel closed: {context}")]
    ChannelClosed { context: &'static str },

    /// Write failed for a reason other than backpressure.
    #[error("write failed on channel {channel_id}: {description}")]
    WriteFailed {
        channel_id: u64,
        description: String,
    },
}

impl TransportError {
    pub fn is_no_buffers(&self) -> bool {
        matches!(self, TransportError::NoBuffers { .. })
    }
}
