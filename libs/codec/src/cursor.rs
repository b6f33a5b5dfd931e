//! Encode/decode cursors.
//!
//! `EncodeCursor` writes big-endian primitives into a fixed-capacity buffer;
//! `DecodeCursor` reads them back with bounds checks before every access.
//! Containers are length-prefixed: `begin_container` reserves a two-byte
//! length slot, `end_container` backfills it once the contents are known.
//!
//! A cursor never rolls back. If any write fails the buffer contents are an
//! unusable prefix and the caller must discard the buffer.

use crate::error::{CodecError, CodecResult};
use byteorder::{BigEndian, ByteOrder};

/// Handle returned by `begin_container`, consumed by `end_container`.
#[derive(Debug)]
#[must_use]
pub struct ContainerMark {
    len_offset: usize,
}

/// Write cursor over a fixed-capacity byte buffer.
///
/// The buffer grows logically via `Vec::extend` but is capped at the
/// capacity the transport granted; exceeding it is a `BufferTooSmall`
/// failure, mirroring what a real bounded transport buffer would do.
#[derive(Debug)]
pub struct EncodeCursor<'a> {
    buf: &'a mut Vec<u8>,
    capacity: usize,
    major_version: u8,
    minor_version: u8,
}

impl<'a> EncodeCursor<'a> {
    /// Position the cursor over `buf`, writing at most `capacity` bytes.
    pub fn new(buf: &'a mut Vec<u8>, capacity: usize, major: u8, minor: u8) -> Self {
        Self {
            buf,
            capacity,
            major_version: major,
            minor_version: minor,
        }
    }

    pub fn major_version(&self) -> u8 {
        self.major_version
    }

    pub fn minor_version(&self) -> u8 {
        self.minor_version
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, additional: usize, context: &'static str) -> CodecResult<()> {
        let need = self.buf.len() + additional;
        if need > self.capacity {
            return Err(CodecError::buffer_too_small(need, self.capacity, context));
        }
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> CodecResult<()> {
        self.ensure(1, "u8")?;
        self.buf.push(v);
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> CodecResult<()> {
        self.ensure(2, "u16")?;
        let mut tmp = [0u8; 2];
        BigEndian::write_u16(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> CodecResult<()> {
        self.ensure(4, "u32")?;
        let mut tmp = [0u8; 4];
        BigEndian::write_u32(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> CodecResult<()> {
        self.ensure(8, "u64")?;
        let mut tmp = [0u8; 8];
        BigEndian::write_u64(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> CodecResult<()> {
        self.write_u32(v as u32)
    }

    pub fn write_i64(&mut self, v: i64) -> CodecResult<()> {
        self.write_u64(v as u64)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> CodecResult<()> {
        self.ensure(bytes.len(), "bytes")?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Write a u16-length-prefixed byte string.
    pub fn write_prefixed(&mut self, bytes: &[u8]) -> CodecResult<()> {
        debug_assert!(bytes.len() <= u16::MAX as usize);
        self.write_u16(bytes.len() as u16)?;
        self.write_bytes(bytes)
    }

    /// Reserve a two-byte length slot for a container.
    pub fn begin_container(&mut self) -> CodecResult<ContainerMark> {
        let len_offset = self.buf.len();
        self.write_u16(0)?;
        Ok(ContainerMark { len_offset })
    }

    /// Backfill the container length reserved by `begin_container`.
    pub fn end_container(&mut self, mark: ContainerMark) -> CodecResult<()> {
        let body_len = self.buf.len() - mark.len_offset - 2;
        debug_assert!(body_len <= u16::MAX as usize);
        BigEndian::write_u16(
            &mut self.buf[mark.len_offset..mark.len_offset + 2],
            body_len as u16,
        );
        Ok(())
    }
}

/// Read cursor over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct DecodeCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Exclusive upper bound; narrowed while inside a container.
    limit: usize,
}

impl<'a> DecodeCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            limit: buf.len(),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes remaining inside the current limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.limit
    }

    fn take(&mut self, n: usize, context: &'static str) -> CodecResult<&'a [u8]> {
        if self.pos + n > self.limit {
            return Err(CodecError::truncated(
                self.pos,
                n,
                self.remaining(),
                context,
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self, context: &'static str) -> CodecResult<u8> {
        Ok(self.take(1, context)?[0])
    }

    pub fn read_u16(&mut self, context: &'static str) -> CodecResult<u16> {
        Ok(BigEndian::read_u16(self.take(2, context)?))
    }

    pub fn read_u32(&mut self, context: &'static str) -> CodecResult<u32> {
        Ok(BigEndian::read_u32(self.take(4, context)?))
    }

    pub fn read_u64(&mut self, context: &'static str) -> CodecResult<u64> {
        Ok(BigEndian::read_u64(self.take(8, context)?))
    }

    pub fn read_i32(&mut self, context: &'static str) -> CodecResult<i32> {
        Ok(self.read_u32(context)? as i32)
    }

    pub fn read_i64(&mut self, context: &'static str) -> CodecResult<i64> {
        Ok(self.read_u64(context)? as i64)
    }

    pub fn read_bytes(&mut self, n: usize, context: &'static str) -> CodecResult<&'a [u8]> {
        self.take(n, context)
    }

    /// Read a u16-length-prefixed byte string.
    pub fn read_prefixed(&mut self, context: &'static str) -> CodecResult<&'a [u8]> {
        let len = self.read_u16(context)? as usize;
        self.take(len, context)
    }

    /// Enter a length-prefixed container: returns a cursor limited to the
    /// container body and advances `self` past it.
    pub fn enter_container(&mut self, context: &'static str) -> CodecResult<DecodeCursor<'a>> {
        let declared = self.read_u16(context)? as usize;
        if self.pos + declared > self.limit {
            return Err(CodecError::ContainerOverrun {
                offset: self.pos,
                declared,
                remaining: self.remaining(),
            });
        }
        let inner = DecodeCursor {
            buf: self.buf,
            pos: self.pos,
            limit: self.pos + declared,
        };
        self.pos += declared;
        Ok(inner)
    }

    /// Skip `n` bytes without interpreting them.
    pub fn skip(&mut self, n: usize, context: &'static str) -> CodecResult<()> {
        self.take(n, context)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 64, 14, 1);
        enc.write_u8(0xAB).unwrap();
        enc.write_u16(0xBEEF).unwrap();
        enc.write_u32(0xDEADBEEF).unwrap();
        enc.write_i64(-42).unwrap();
        enc.write_prefixed(b"Position").unwrap();

        let mut dec = DecodeCursor::new(&buf);
        assert_eq!(dec.read_u8("t").unwrap(), 0xAB);
        assert_eq!(dec.read_u16("t").unwrap(), 0xBEEF);
        assert_eq!(dec.read_u32("t").unwrap(), 0xDEADBEEF);
        assert_eq!(dec.read_i64("t").unwrap(), -42);
        assert_eq!(dec.read_prefixed("t").unwrap(), b"Position");
        assert!(dec.is_at_end());
    }

    #[test]
    fn encode_past_capacity_fails() {
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 4, 14, 1);
        enc.write_u32(1).unwrap();
        let err = enc.write_u8(2).unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall { .. }));
    }

    #[test]
    fn container_length_is_backfilled() {
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 64, 14, 1);
        let mark = enc.begin_container().unwrap();
        enc.write_u32(7).unwrap();
        enc.end_container(mark).unwrap();
        enc.write_u8(0xFF).unwrap();

        let mut dec = DecodeCursor::new(&buf);
        let mut inner = dec.enter_container("t").unwrap();
        assert_eq!(inner.remaining(), 4);
        assert_eq!(inner.read_u32("t").unwrap(), 7);
        assert!(inner.is_at_end());
        assert_eq!(dec.read_u8("t").unwrap(), 0xFF);
    }

    #[test]
    fn truncated_read_reports_offset_and_need() {
        let buf = [0u8; 2];
        let mut dec = DecodeCursor::new(&buf);
        let err = dec.read_u32("streamId").unwrap_err();
        assert_eq!(
            err,
            CodecError::truncated(0, 4, 2, "streamId")
        );
    }

    #[test]
    fn container_overrun_is_rejected() {
        // Declared length 10, only 1 byte behind it.
        let buf = [0x00, 0x0A, 0x01];
        let mut dec = DecodeCursor::new(&buf);
        let err = dec.enter_container("t").unwrap_err();
        assert!(matches!(err, CodecError::ContainerOverrun { .. }));
    }
}
