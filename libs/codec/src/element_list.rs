//! Element list container codec.
//!
//! An element list is a length-prefixed stream of named entries:
//!
//! ```text
//! u16 body_len | entry | entry | ...
//! entry: u8 name_len | name | u8 data_type | u16 value_len | value
//! ```
//!
//! Decode iterates entries until the container body is exhausted; the
//! iterator returning `Ok(None)` is the normal end-of-container signal,
//! distinct from any failure. Entries whose name is not recognized by the
//! caller are skipped without error so that newer peers can add elements
//! without breaking older decoders.

use crate::cursor::{ContainerMark, DecodeCursor, EncodeCursor};
use crate::error::{CodecError, CodecResult};
use types::DataType;

/// Streaming encoder for one element list.
pub struct ElementListEncoder {
    mark: ContainerMark,
}

impl ElementListEncoder {
    /// Open the list; entries are added through the `add_*` methods and the
    /// list must be closed with [`complete`](Self::complete).
    pub fn init(enc: &mut EncodeCursor<'_>) -> CodecResult<Self> {
        let mark = enc.begin_container()?;
        Ok(Self { mark })
    }

    fn entry_header(
        enc: &mut EncodeCursor<'_>,
        name: &[u8],
        data_type: DataType,
        value_len: usize,
    ) -> CodecResult<()> {
        debug_assert!(name.len() <= u8::MAX as usize);
        enc.write_u8(name.len() as u8)?;
        enc.write_bytes(name)?;
        enc.write_u8(data_type.into())?;
        enc.write_u16(value_len as u16)
    }

    pub fn add_uint(&mut self, enc: &mut EncodeCursor<'_>, name: &[u8], v: u64) -> CodecResult<()> {
        Self::entry_header(enc, name, DataType::UInt, 8)?;
        enc.write_u64(v)
    }

    pub fn add_int(&mut self, enc: &mut EncodeCursor<'_>, name: &[u8], v: i64) -> CodecResult<()> {
        Self::entry_header(enc, name, DataType::Int, 8)?;
        enc.write_i64(v)
    }

    pub fn add_ascii(
        &mut self,
        enc: &mut EncodeCursor<'_>,
        name: &[u8],
        value: &[u8],
    ) -> CodecResult<()> {
        Self::entry_header(enc, name, DataType::AsciiString, value.len())?;
        enc.write_bytes(value)
    }

    pub fn add_buffer(
        &mut self,
        enc: &mut EncodeCursor<'_>,
        name: &[u8],
        value: &[u8],
    ) -> CodecResult<()> {
        Self::entry_header(enc, name, DataType::Buffer, value.len())?;
        enc.write_bytes(value)
    }

    /// Open a nested-container entry. The caller writes the body through the
    /// cursor, then closes it with [`end_nested`](Self::end_nested).
    pub fn begin_nested(
        &mut self,
        enc: &mut EncodeCursor<'_>,
        name: &[u8],
        data_type: DataType,
    ) -> CodecResult<ContainerMark> {
        debug_assert!(name.len() <= u8::MAX as usize);
        enc.write_u8(name.len() as u8)?;
        enc.write_bytes(name)?;
        enc.write_u8(data_type.into())?;
        enc.begin_container()
    }

    pub fn end_nested(
        &mut self,
        enc: &mut EncodeCursor<'_>,
        mark: ContainerMark,
    ) -> CodecResult<()> {
        enc.end_container(mark)
    }

    pub fn complete(self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        enc.end_container(self.mark)
    }
}

/// One decoded element entry. The value is a borrowed slice; typed access
/// goes through the `expect_*` methods, which hard-fail on a declared type
/// that does not match what the caller requires.
#[derive(Debug)]
pub struct ElementEntry<'a> {
    pub name: &'a [u8],
    type_tag: u8,
    offset: usize,
    value: &'a [u8],
}

impl<'a> ElementEntry<'a> {
    /// Declared data type, if this decoder release knows the tag.
    pub fn declared_type(&self) -> Option<DataType> {
        DataType::try_from(self.type_tag).ok()
    }

    fn type_mismatch(&self, expected: DataType) -> CodecError {
        match self.declared_type() {
            Some(got) => CodecError::wrong_element_type(self.name, expected, got),
            None => CodecError::UnknownTag {
                tag: self.type_tag,
                what: "element data type",
                offset: self.offset,
            },
        }
    }

    pub fn expect_uint(&self) -> CodecResult<u64> {
        if self.declared_type() != Some(DataType::UInt) || self.value.len() != 8 {
            return Err(self.type_mismatch(DataType::UInt));
        }
        let mut cur = DecodeCursor::new(self.value);
        cur.read_u64("element uint")
    }

    pub fn expect_int(&self) -> CodecResult<i64> {
        if self.declared_type() != Some(DataType::Int) || self.value.len() != 8 {
            return Err(self.type_mismatch(DataType::Int));
        }
        let mut cur = DecodeCursor::new(self.value);
        cur.read_i64("element int")
    }

    /// Ascii and opaque buffers are interchangeable on the read side, same
    /// as the wire peers treat them.
    pub fn expect_bytes(&self) -> CodecResult<&'a [u8]> {
        match self.declared_type() {
            Some(DataType::AsciiString) | Some(DataType::Buffer) => Ok(self.value),
            _ => Err(self.type_mismatch(DataType::AsciiString)),
        }
    }

    /// Cursor over the body of a nested-container entry.
    pub fn expect_nested(&self, data_type: DataType) -> CodecResult<DecodeCursor<'a>> {
        if self.declared_type() != Some(data_type) {
            return Err(self.type_mismatch(data_type));
        }
        Ok(DecodeCursor::new(self.value))
    }
}

/// Streaming decoder for one element list.
pub struct ElementListDecoder<'a> {
    cur: DecodeCursor<'a>,
}

impl<'a> ElementListDecoder<'a> {
    pub fn init(dec: &mut DecodeCursor<'a>) -> CodecResult<Self> {
        let cur = dec.enter_container("element list")?;
        Ok(Self { cur })
    }

    /// Next entry, or `Ok(None)` once the container body is exhausted.
    pub fn decode_next(&mut self) -> CodecResult<Option<ElementEntry<'a>>> {
        if self.cur.is_at_end() {
            return Ok(None);
        }
        let offset = self.cur.position();
        let name_len = self.cur.read_u8("element name length")? as usize;
        let name = self.cur.read_bytes(name_len, "element name")?;
        let type_tag = self.cur.read_u8("element data type")?;
        let value_len = self.cur.read_u16("element value length")? as usize;
        let value = self.cur.read_bytes(value_len, "element value")?;
        Ok(Some(ElementEntry {
            name,
            type_tag,
            offset,
            value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::names;

    fn encode_sample() -> Vec<u8> {
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 256, 14, 1);
        let mut list = ElementListEncoder::init(&mut enc).unwrap();
        list.add_ascii(&mut enc, names::APPLICATION_ID, b"256").unwrap();
        list.add_uint(&mut enc, names::SINGLE_OPEN, 1).unwrap();
        list.add_int(&mut enc, b"Offset", -9).unwrap();
        list.complete(&mut enc).unwrap();
        buf
    }

    #[test]
    fn entries_round_trip_in_order() {
        let buf = encode_sample();
        let mut dec = DecodeCursor::new(&buf);
        let mut list = ElementListDecoder::init(&mut dec).unwrap();

        let e = list.decode_next().unwrap().unwrap();
        assert_eq!(e.name, names::APPLICATION_ID);
        assert_eq!(e.expect_bytes().unwrap(), b"256");

        let e = list.decode_next().unwrap().unwrap();
        assert_eq!(e.name, names::SINGLE_OPEN);
        assert_eq!(e.expect_uint().unwrap(), 1);

        let e = list.decode_next().unwrap().unwrap();
        assert_eq!(e.expect_int().unwrap(), -9);

        assert!(list.decode_next().unwrap().is_none());
    }

    #[test]
    fn wrong_declared_type_is_a_hard_failure() {
        let buf = encode_sample();
        let mut dec = DecodeCursor::new(&buf);
        let mut list = ElementListDecoder::init(&mut dec).unwrap();
        let e = list.decode_next().unwrap().unwrap();
        // ApplicationId is ascii; asking for uint must fail loudly.
        let err = e.expect_uint().unwrap_err();
        assert!(matches!(err, CodecError::WrongElementType { .. }));
    }

    #[test]
    fn unknown_entries_can_be_skipped() {
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 256, 14, 1);
        let mut list = ElementListEncoder::init(&mut enc).unwrap();
        list.add_uint(&mut enc, b"SomeFutureElement", 7).unwrap();
        list.add_uint(&mut enc, names::SINGLE_OPEN, 0).unwrap();
        list.complete(&mut enc).unwrap();

        let mut dec = DecodeCursor::new(&buf);
        let mut list = ElementListDecoder::init(&mut dec).unwrap();
        let mut single_open = None;
        while let Some(entry) = list.decode_next().unwrap() {
            if entry.name == names::SINGLE_OPEN {
                single_open = Some(entry.expect_uint().unwrap());
            }
            // Anything else: skipped without touching the value.
        }
        assert_eq!(single_open, Some(0));
    }
}
