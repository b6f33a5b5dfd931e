//! Channel trait and transport buffers.
//!
//! The write contract mirrors a socket transport: `write` either takes the
//! buffer and delivers it, or hands it back with `CallAgain`, in which case
//! the caller flushes and retries in a loop. A buffer that was handed out
//! but never written must be released so the pool stays bounded.

use crate::error::TransportError;

/// A pooled, bounded buffer obtained from a channel.
///
/// Message boundaries inside a packed buffer are tracked out-of-band in
/// `boundaries`; `mark_message_boundary` is called between messages and the
/// channel splits on write.
#[derive(Debug)]
pub struct TransportBuffer {
    data: Vec<u8>,
    capacity: usize,
    packable: bool,
    boundaries: Vec<usize>,
}

impl TransportBuffer {
    pub(crate) fn new(capacity: usize, packable: bool) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            packable,
            boundaries: Vec::new(),
        }
    }

    /// Backing storage the encode cursor writes into.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Space left for further packed messages.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn is_packable(&self) -> bool {
        self.packable
    }

    /// Close the current message so another can be packed behind it.
    /// Returns the remaining capacity.
    pub fn mark_message_boundary(&mut self) -> usize {
        self.boundaries.push(self.data.len());
        self.remaining()
    }

    /// Split the buffer contents into individual messages at the recorded
    /// boundaries. The final (unterminated) message is included.
    pub(crate) fn into_messages(self) -> Vec<Vec<u8>> {
        let mut messages = Vec::with_capacity(self.boundaries.len() + 1);
        let mut start = 0usize;
        for &end in &self.boundaries {
            if end > start {
                messages.push(self.data[start..end].to_vec());
            }
            start = end;
        }
        if start < self.data.len() {
            messages.push(self.data[start..].to_vec());
        }
        messages
    }
}

/// Priority hint for a write; the loopback channel delivers in order
/// regardless, a socket transport would queue by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePriority {
    High,
    Medium,
    Low,
}

/// Result of a successful `write` call.
#[derive(Debug)]
pub enum WriteOutcome {
    /// Buffer accepted and delivered; it is gone.
    Written { bytes: usize },
    /// Transport needs a flush before accepting this buffer; it is handed
    /// back untouched for the retry loop.
    CallAgain(TransportBuffer),
}

/// Byte-moving boundary every harness component writes through.
pub trait Channel: Send + Sync {
    /// Stable identity for registries keyed by channel.
    fn id(&self) -> u64;

    /// Acquire a buffer of at least `length` bytes. `packable` requests a
    /// buffer that may hold several messages.
    fn get_buffer(&self, length: usize, packable: bool)
        -> Result<TransportBuffer, TransportError>;

    /// Write a completed buffer. May return `CallAgain`, in which case the
    /// caller flushes and retries with the returned buffer.
    fn write(
        &self,
        buffer: TransportBuffer,
        priority: WritePriority,
    ) -> Result<WriteOutcome, TransportError>;

    /// Push any transport-internal pending data toward the peer.
    fn flush(&self) -> Result<(), TransportError>;

    /// Return an unused buffer to the pool.
    fn release_buffer(&self, buffer: TransportBuffer);

    /// Next inbound message, if any.
    fn read(&self) -> Result<Option<Vec<u8>>, TransportError>;

    fn major_version(&self) -> u8;
    fn minor_version(&self) -> u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_split_preserves_message_bytes() {
        let mut buf = TransportBuffer::new(64, true);
        buf.data_mut().extend_from_slice(b"first");
        let remaining = buf.mark_message_boundary();
        assert_eq!(remaining, 64 - 5);
        buf.data_mut().extend_from_slice(b"second");
        buf.mark_message_boundary();
        buf.data_mut().extend_from_slice(b"third");

        let messages = buf.into_messages();
        assert_eq!(messages, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
    }

    #[test]
    fn unpacked_buffer_is_one_message() {
        let mut buf = TransportBuffer::new(16, false);
        buf.data_mut().extend_from_slice(b"only");
        assert_eq!(buf.into_messages(), vec![b"only".to_vec()]);
    }
}
