//! Field list container codec.
//!
//! Field lists carry item payload data keyed by numeric field identifiers
//! instead of names:
//!
//! ```text
//! u16 body_len | entry | entry | ...
//! entry: i16 fid | u8 data_type | u16 value_len | value
//! ```
//!
//! A field's wire type is authoritative from the dictionary; decoders that
//! meet a fid absent from their dictionary reject the message.

use crate::cursor::{DecodeCursor, EncodeCursor};
use crate::error::{CodecError, CodecResult};
use types::DataType;

/// Typed payload value of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    UInt(u64),
    Int(i64),
    /// Fixed-point decimal: mantissa plus power-of-ten hint.
    Real { mantissa: i64, exponent: i8 },
    Ascii(Vec<u8>),
}

impl FieldValue {
    pub fn data_type(&self) -> DataType {
        match self {
            FieldValue::UInt(_) => DataType::UInt,
            FieldValue::Int(_) => DataType::Int,
            FieldValue::Real { .. } => DataType::Real,
            FieldValue::Ascii(_) => DataType::AsciiString,
        }
    }
}

/// Streaming encoder for one field list.
pub struct FieldListEncoder {
    mark: crate::cursor::ContainerMark,
}

impl FieldListEncoder {
    pub fn init(enc: &mut EncodeCursor<'_>) -> CodecResult<Self> {
        let mark = enc.begin_container()?;
        Ok(Self { mark })
    }

    pub fn add(&mut self, enc: &mut EncodeCursor<'_>, fid: i16, value: &FieldValue) -> CodecResult<()> {
        enc.write_u16(fid as u16)?;
        enc.write_u8(value.data_type().into())?;
        match value {
            FieldValue::UInt(v) => {
                enc.write_u16(8)?;
                enc.write_u64(*v)
            }
            FieldValue::Int(v) => {
                enc.write_u16(8)?;
                enc.write_i64(*v)
            }
            FieldValue::Real { mantissa, exponent } => {
                enc.write_u16(9)?;
                enc.write_i64(*mantissa)?;
                enc.write_u8(*exponent as u8)
            }
            FieldValue::Ascii(bytes) => {
                debug_assert!(bytes.len() <= u16::MAX as usize);
                enc.write_u16(bytes.len() as u16)?;
                enc.write_bytes(bytes)
            }
        }
    }

    pub fn complete(self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        enc.end_container(self.mark)
    }
}

/// One decoded field entry.
#[derive(Debug)]
pub struct FieldEntry<'a> {
    pub fid: i16,
    type_tag: u8,
    offset: usize,
    value: &'a [u8],
}

impl<'a> FieldEntry<'a> {
    pub fn declared_type(&self) -> Option<DataType> {
        DataType::try_from(self.type_tag).ok()
    }

    /// Interpret the value according to its declared type.
    pub fn value(&self) -> CodecResult<FieldValue> {
        let mut cur = DecodeCursor::new(self.value);
        match self.declared_type() {
            Some(DataType::UInt) => Ok(FieldValue::UInt(cur.read_u64("field uint")?)),
            Some(DataType::Int) => Ok(FieldValue::Int(cur.read_i64("field int")?)),
            Some(DataType::Real) => {
                let mantissa = cur.read_i64("field real mantissa")?;
                let exponent = cur.read_u8("field real exponent")? as i8;
                Ok(FieldValue::Real { mantissa, exponent })
            }
            Some(DataType::AsciiString) | Some(DataType::Buffer) => {
                Ok(FieldValue::Ascii(self.value.to_vec()))
            }
            _ => Err(CodecError::UnknownTag {
                tag: self.type_tag,
                what: "field data type",
                offset: self.offset,
            }),
        }
    }

    /// Fast path for latency timestamp fields: the value must be a uint.
    pub fn expect_uint(&self) -> CodecResult<u64> {
        if self.declared_type() != Some(DataType::UInt) || self.value.len() != 8 {
            return Err(CodecError::decode(
                self.offset,
                format!("field {} is not a uint", self.fid),
            ));
        }
        let mut cur = DecodeCursor::new(self.value);
        cur.read_u64("field uint")
    }
}

/// Streaming decoder for one field list.
pub struct FieldListDecoder<'a> {
    cur: DecodeCursor<'a>,
}

impl<'a> FieldListDecoder<'a> {
    pub fn init(dec: &mut DecodeCursor<'a>) -> CodecResult<Self> {
        let cur = dec.enter_container("field list")?;
        Ok(Self { cur })
    }

    /// Next entry, or `Ok(None)` at end of container.
    pub fn decode_next(&mut self) -> CodecResult<Option<FieldEntry<'a>>> {
        if self.cur.is_at_end() {
            return Ok(None);
        }
        let offset = self.cur.position();
        let fid = self.cur.read_u16("field id")? as i16;
        let type_tag = self.cur.read_u8("field data type")?;
        let value_len = self.cur.read_u16("field value length")? as usize;
        let value = self.cur.read_bytes(value_len, "field value")?;
        Ok(Some(FieldEntry {
            fid,
            type_tag,
            offset,
            value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_values_round_trip() {
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 256, 14, 1);
        let mut list = FieldListEncoder::init(&mut enc).unwrap();
        list.add(&mut enc, 22, &FieldValue::Real { mantissa: 399950, exponent: -2 })
            .unwrap();
        list.add(&mut enc, 25, &FieldValue::UInt(1000)).unwrap();
        list.add(&mut enc, -100, &FieldValue::Int(-5)).unwrap();
        list.add(&mut enc, 3, &FieldValue::Ascii(b"TRI.N".to_vec()))
            .unwrap();
        list.complete(&mut enc).unwrap();

        let mut dec = DecodeCursor::new(&buf);
        let mut list = FieldListDecoder::init(&mut dec).unwrap();

        let e = list.decode_next().unwrap().unwrap();
        assert_eq!(e.fid, 22);
        assert_eq!(
            e.value().unwrap(),
            FieldValue::Real { mantissa: 399950, exponent: -2 }
        );

        let e = list.decode_next().unwrap().unwrap();
        assert_eq!(e.expect_uint().unwrap(), 1000);

        let e = list.decode_next().unwrap().unwrap();
        assert_eq!(e.fid, -100);
        assert_eq!(e.value().unwrap(), FieldValue::Int(-5));

        let e = list.decode_next().unwrap().unwrap();
        assert_eq!(e.value().unwrap(), FieldValue::Ascii(b"TRI.N".to_vec()));

        assert!(list.decode_next().unwrap().is_none());
    }

    #[test]
    fn unknown_type_tag_is_reported() {
        // fid 5, bogus type 0x77, zero-length value
        let body = [0x00, 0x05, 0x77, 0x00, 0x00];
        let mut buf = vec![0x00, body.len() as u8];
        buf.extend_from_slice(&body);
        let mut dec = DecodeCursor::new(&buf);
        let mut list = FieldListDecoder::init(&mut dec).unwrap();
        let e = list.decode_next().unwrap().unwrap();
        assert!(matches!(e.value().unwrap_err(), CodecError::UnknownTag { .. }));
    }
}
