//! Dictionary domain messages and the field dictionary itself.
//!
//! A field dictionary maps numeric field identifiers to their names and
//! wire types. Decoders resolve every payload fid through it; an identifier
//! the dictionary does not know is a decode failure.

use crate::cursor::{DecodeCursor, EncodeCursor};
use crate::error::{CodecError, CodecResult};
use crate::msg::{encode_header, HeaderSpec, RawMsg};
use std::collections::HashMap;
use types::{BufferValue, DataType, DomainType, MsgClass, State};

/// Stream ids the harnesses use for the two dictionary downloads.
pub const FIELD_DICTIONARY_STREAM_ID: i32 = 3;
pub const ENUM_DICTIONARY_STREAM_ID: i32 = 4;

pub const FIELD_DICTIONARY_NAME: &[u8] = b"RWFFld";
pub const ENUM_DICTIONARY_NAME: &[u8] = b"RWFEnum";

/// One dictionary entry: fid, display name, declared wire type.
#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryEntry {
    pub fid: i16,
    pub name: BufferValue,
    pub data_type: DataType,
}

/// Field dictionary: fid-keyed lookup used by payload decoders.
#[derive(Debug, Clone, Default)]
pub struct FieldDictionary {
    entries: HashMap<i16, DictionaryEntry>,
}

impl FieldDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: DictionaryEntry) {
        self.entries.insert(entry.fid, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a fid; unknown identifiers are a decode failure.
    pub fn lookup(&self, fid: i16) -> CodecResult<&DictionaryEntry> {
        self.entries
            .get(&fid)
            .ok_or(CodecError::UnknownFieldId { fid })
    }

    pub fn entries(&self) -> impl Iterator<Item = &DictionaryEntry> {
        self.entries.values()
    }

    /// Load all entries carried by a refresh.
    pub fn load_from_refresh(&mut self, refresh: &DictionaryRefresh) {
        for entry in &refresh.entries {
            self.insert(entry.clone());
        }
    }
}

/// Request for a dictionary download.
#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryRequest {
    pub stream_id: i32,
    pub dictionary_name: BufferValue,
    pub service_id: Option<u16>,
    pub verbosity: u32,
}

impl Default for DictionaryRequest {
    fn default() -> Self {
        Self {
            stream_id: FIELD_DICTIONARY_STREAM_ID,
            dictionary_name: BufferValue::from_bytes(FIELD_DICTIONARY_NAME),
            service_id: None,
            verbosity: 0,
        }
    }
}

impl DictionaryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Request, DomainType::Dictionary, self.stream_id);
        spec.streaming = false;
        spec.key_name = Some(self.dictionary_name.as_bytes());
        spec.key_service_id = self.service_id;
        encode_header(enc, &spec)?;
        enc.write_u32(self.verbosity)
    }

    pub fn decode(&mut self, raw: &RawMsg<'_>) -> CodecResult<()> {
        self.clear();
        if raw.msg_class != MsgClass::Request {
            return Err(CodecError::UnexpectedMsgClass {
                expected: MsgClass::Request,
                got: raw.msg_class,
            });
        }
        self.stream_id = raw.stream_id;
        let key = raw
            .key
            .as_ref()
            .ok_or(CodecError::Missing { what: "dictionary name" })?;
        match key.name {
            Some(name) => self.dictionary_name.set(name),
            None => return Err(CodecError::Missing { what: "dictionary name" }),
        }
        self.service_id = key.service_id;
        let mut cur = DecodeCursor::new(raw.payload);
        self.verbosity = cur.read_u32("dictionary verbosity")?;
        Ok(())
    }
}

/// Single-part dictionary download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DictionaryRefresh {
    pub stream_id: i32,
    pub dictionary_name: BufferValue,
    pub solicited: bool,
    pub state: State,
    pub entries: Vec<DictionaryEntry>,
}

impl DictionaryRefresh {
    pub fn new() -> Self {
        let mut msg = Self::default();
        msg.clear();
        msg
    }

    pub fn clear(&mut self) {
        self.stream_id = FIELD_DICTIONARY_STREAM_ID;
        self.dictionary_name.clear();
        self.solicited = false;
        self.state.clear();
        self.entries.clear();
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Refresh, DomainType::Dictionary, self.stream_id);
        spec.state = Some(&self.state);
        spec.solicited = self.solicited;
        spec.refresh_complete = true;
        if !self.dictionary_name.is_empty() {
            spec.key_name = Some(self.dictionary_name.as_bytes());
        }
        spec.container_type = Some(DataType::ElementList);
        encode_header(enc, &spec)?;

        enc.write_u16(self.entries.len() as u16)?;
        for entry in &self.entries {
            enc.write_u16(entry.fid as u16)?;
            enc.write_prefixed(entry.name.as_bytes())?;
            enc.write_u8(entry.data_type.into())?;
        }
        Ok(())
    }

    pub fn decode(&mut self, raw: &RawMsg<'_>) -> CodecResult<()> {
        self.clear();
        if raw.msg_class != MsgClass::Refresh {
            return Err(CodecError::UnexpectedMsgClass {
                expected: MsgClass::Refresh,
                got: raw.msg_class,
            });
        }
        self.stream_id = raw.stream_id;
        self.solicited = raw.solicited();
        if let Some(state) = &raw.state {
            state.copy_into(&mut self.state);
        }
        if let Some(key) = &raw.key {
            if let Some(name) = key.name {
                self.dictionary_name.set(name);
            }
        }

        let mut cur = DecodeCursor::new(raw.payload);
        let count = cur.read_u16("dictionary entry count")? as usize;
        for _ in 0..count {
            let fid = cur.read_u16("dictionary fid")? as i16;
            let name = cur.read_prefixed("dictionary field name")?;
            let type_tag = cur.read_u8("dictionary field type")?;
            let data_type = DataType::try_from(type_tag).map_err(|_| CodecError::UnknownTag {
                tag: type_tag,
                what: "dictionary field type",
                offset: cur.position(),
            })?;
            self.entries.push(DictionaryEntry {
                fid,
                name: BufferValue::from_bytes(name),
                data_type,
            });
        }
        Ok(())
    }
}

/// Closes a dictionary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryClose {
    pub stream_id: i32,
}

impl Default for DictionaryClose {
    fn default() -> Self {
        Self {
            stream_id: FIELD_DICTIONARY_STREAM_ID,
        }
    }
}

impl DictionaryClose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.stream_id = FIELD_DICTIONARY_STREAM_ID;
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let spec = HeaderSpec::new(MsgClass::Close, DomainType::Dictionary, self.stream_id);
        encode_header(enc, &spec)
    }

    pub fn decode(&mut self, raw: &RawMsg<'_>) -> CodecResult<()> {
        self.clear();
        if raw.msg_class != MsgClass::Close {
            return Err(CodecError::UnexpectedMsgClass {
                expected: MsgClass::Close,
                got: raw.msg_class,
            });
        }
        self.stream_id = raw.stream_id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_refresh() -> DictionaryRefresh {
        let mut refresh = DictionaryRefresh::new();
        refresh.dictionary_name.set(FIELD_DICTIONARY_NAME);
        refresh.solicited = true;
        refresh.entries = vec![
            DictionaryEntry {
                fid: 22,
                name: BufferValue::from_bytes(b"BID"),
                data_type: DataType::Real,
            },
            DictionaryEntry {
                fid: 25,
                name: BufferValue::from_bytes(b"ASK"),
                data_type: DataType::Real,
            },
            DictionaryEntry {
                fid: 3902,
                name: BufferValue::from_bytes(b"TIM_TRK_1"),
                data_type: DataType::UInt,
            },
        ];
        refresh
    }

    #[test]
    fn refresh_round_trips_entries() {
        let refresh = sample_refresh();
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 1024, 14, 1);
        refresh.encode(&mut enc).unwrap();

        let raw = RawMsg::decode(&buf).unwrap();
        let mut decoded = DictionaryRefresh::new();
        decoded.decode(&raw).unwrap();
        assert_eq!(decoded, refresh);
    }

    #[test]
    fn dictionary_lookup_resolves_known_and_rejects_unknown() {
        let mut dictionary = FieldDictionary::new();
        dictionary.load_from_refresh(&sample_refresh());
        assert_eq!(dictionary.len(), 3);
        assert_eq!(dictionary.lookup(22).unwrap().name.as_bytes(), b"BID");
        assert!(matches!(
            dictionary.lookup(9999).unwrap_err(),
            CodecError::UnknownFieldId { fid: 9999 }
        ));
    }

    #[test]
    fn request_round_trips_name_and_service() {
        let mut request = DictionaryRequest::new();
        request.service_id = Some(1);
        request.verbosity = 7;

        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 128, 14, 1);
        request.encode(&mut enc).unwrap();

        let raw = RawMsg::decode(&buf).unwrap();
        let mut decoded = DictionaryRequest::new();
        decoded.decode(&raw).unwrap();
        assert_eq!(decoded, request);
    }
}
