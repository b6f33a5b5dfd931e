//! Wire message header.
//!
//! Every message starts with a fixed header, followed by optional sections
//! gated by a flags byte, then the key attributes (an element list), then
//! the payload container:
//!
//! ```text
//! u8 msg_class | u8 domain | i32 stream_id | u8 flags | u8 container_type
//! [u32 seq_num]                if HAS_SEQ_NUM
//! [state]                      if HAS_STATE
//! [msg_key]                    if HAS_MSG_KEY
//! [attrib element list]        if key flags carry HAS_ATTRIB
//! payload...                   container_type says how to read it
//! ```
//!
//! A flag bit is set if and only if the section behind it was written;
//! decode re-derives presence from the same bits and never reads a section
//! whose bit is clear.

use crate::cursor::{DecodeCursor, EncodeCursor};
use crate::error::{CodecError, CodecResult};
use types::{BufferValue, DataState, DataType, DomainType, MsgClass, State, StateCode, StreamState};

/// Header flag bits.
pub mod flags {
    pub const HAS_MSG_KEY: u8 = 0x01;
    pub const HAS_STATE: u8 = 0x02;
    pub const HAS_SEQ_NUM: u8 = 0x04;
    pub const SOLICITED: u8 = 0x08;
    pub const REFRESH_COMPLETE: u8 = 0x10;
    pub const CLEAR_CACHE: u8 = 0x20;
    pub const STREAMING: u8 = 0x40;
    pub const PRIVATE_STREAM: u8 = 0x80;
}

/// Key flag bits.
mod key_flags {
    pub const HAS_NAME: u8 = 0x01;
    pub const HAS_NAME_TYPE: u8 = 0x02;
    pub const HAS_SERVICE_ID: u8 = 0x04;
    pub const HAS_ATTRIB: u8 = 0x08;
}

/// Re-export of the flags module type for callers that store raw bits.
pub type MsgFlags = u8;

/// Everything the header encoder needs to lay down the fixed and optional
/// header sections. The attrib element list and payload are written by the
/// caller immediately after `encode_header` returns.
#[derive(Debug, Default)]
pub struct HeaderSpec<'x> {
    pub msg_class: Option<MsgClass>,
    pub domain: Option<DomainType>,
    pub stream_id: i32,
    pub container_type: Option<DataType>,
    pub seq_num: Option<u32>,
    pub state: Option<&'x State>,
    pub solicited: bool,
    pub refresh_complete: bool,
    pub clear_cache: bool,
    pub streaming: bool,
    pub private_stream: bool,
    pub key_name: Option<&'x [u8]>,
    pub key_name_type: Option<u8>,
    pub key_service_id: Option<u16>,
    /// Caller will write an attrib element list right after the header.
    pub key_attrib_follows: bool,
}

impl<'x> HeaderSpec<'x> {
    pub fn new(msg_class: MsgClass, domain: DomainType, stream_id: i32) -> Self {
        Self {
            msg_class: Some(msg_class),
            domain: Some(domain),
            stream_id,
            container_type: Some(DataType::NoData),
            ..Default::default()
        }
    }

    fn flag_bits(&self) -> u8 {
        let mut bits = 0u8;
        let has_key = self.key_name.is_some()
            || self.key_name_type.is_some()
            || self.key_service_id.is_some()
            || self.key_attrib_follows;
        if has_key {
            bits |= flags::HAS_MSG_KEY;
        }
        if self.state.is_some() {
            bits |= flags::HAS_STATE;
        }
        if self.seq_num.is_some() {
            bits |= flags::HAS_SEQ_NUM;
        }
        if self.solicited {
            bits |= flags::SOLICITED;
        }
        if self.refresh_complete {
            bits |= flags::REFRESH_COMPLETE;
        }
        if self.clear_cache {
            bits |= flags::CLEAR_CACHE;
        }
        if self.streaming {
            bits |= flags::STREAMING;
        }
        if self.private_stream {
            bits |= flags::PRIVATE_STREAM;
        }
        bits
    }
}

/// Write the header sections. The caller continues with the attrib element
/// list (if `key_attrib_follows`) and then the payload.
pub fn encode_header(enc: &mut EncodeCursor<'_>, spec: &HeaderSpec<'_>) -> CodecResult<()> {
    let msg_class = spec.msg_class.ok_or(CodecError::Missing { what: "msg class" })?;
    let domain = spec.domain.ok_or(CodecError::Missing { what: "domain type" })?;
    let container = spec.container_type.unwrap_or(DataType::NoData);

    enc.write_u8(msg_class.into())?;
    enc.write_u8(domain.into())?;
    enc.write_i32(spec.stream_id)?;
    enc.write_u8(spec.flag_bits())?;
    enc.write_u8(container.into())?;

    if let Some(seq) = spec.seq_num {
        enc.write_u32(seq)?;
    }

    if let Some(state) = spec.state {
        enc.write_u8(state.stream_state.into())?;
        enc.write_u8(state.data_state.into())?;
        enc.write_u8(state.code.into())?;
        enc.write_prefixed(state.text.as_bytes())?;
    }

    if spec.flag_bits() & flags::HAS_MSG_KEY != 0 {
        let mut kf = 0u8;
        if spec.key_name.is_some() {
            kf |= key_flags::HAS_NAME;
        }
        if spec.key_name_type.is_some() {
            kf |= key_flags::HAS_NAME_TYPE;
        }
        if spec.key_service_id.is_some() {
            kf |= key_flags::HAS_SERVICE_ID;
        }
        if spec.key_attrib_follows {
            kf |= key_flags::HAS_ATTRIB;
        }
        enc.write_u8(kf)?;
        if let Some(name) = spec.key_name {
            enc.write_prefixed(name)?;
        }
        if let Some(nt) = spec.key_name_type {
            enc.write_u8(nt)?;
        }
        if let Some(sid) = spec.key_service_id {
            enc.write_u16(sid)?;
        }
    }

    Ok(())
}

/// Decoded view of a message key.
#[derive(Debug, Default)]
pub struct RawMsgKey<'a> {
    pub name: Option<&'a [u8]>,
    pub name_type: Option<u8>,
    pub service_id: Option<u16>,
    /// Attrib element list, including its length prefix, ready for
    /// `ElementListDecoder::init` on a fresh cursor.
    pub attrib: Option<&'a [u8]>,
}

impl RawMsgKey<'_> {
    /// Copy identity attributes into an owned `MsgKey`.
    pub fn to_msg_key(&self) -> types::MsgKey {
        let mut key = types::MsgKey::default();
        if let Some(name) = self.name {
            key.name = BufferValue::from_bytes(name);
        }
        key.name_type = self.name_type;
        key.service_id = self.service_id;
        key
    }
}

/// Decoded message header plus borrowed attrib/payload slices. This is what
/// the per-domain `decode` entry points receive alongside the cursor.
#[derive(Debug)]
pub struct RawMsg<'a> {
    pub msg_class: MsgClass,
    pub domain_type: DomainType,
    pub stream_id: i32,
    pub flags: MsgFlags,
    pub container_type: Option<DataType>,
    pub seq_num: Option<u32>,
    pub state: Option<State>,
    pub key: Option<RawMsgKey<'a>>,
    /// Everything after the header sections.
    pub payload: &'a [u8],
}

impl<'a> RawMsg<'a> {
    pub fn solicited(&self) -> bool {
        self.flags & flags::SOLICITED != 0
    }

    pub fn clear_cache(&self) -> bool {
        self.flags & flags::CLEAR_CACHE != 0
    }

    pub fn streaming(&self) -> bool {
        self.flags & flags::STREAMING != 0
    }

    pub fn private_stream(&self) -> bool {
        self.flags & flags::PRIVATE_STREAM != 0
    }

    /// Parse the header sections from `buf`.
    pub fn decode(buf: &'a [u8]) -> CodecResult<RawMsg<'a>> {
        let mut cur = DecodeCursor::new(buf);

        let class_tag = cur.read_u8("msg class")?;
        let msg_class = MsgClass::try_from(class_tag).map_err(|_| CodecError::UnknownTag {
            tag: class_tag,
            what: "msg class",
            offset: 0,
        })?;
        let domain_tag = cur.read_u8("domain type")?;
        let domain_type = DomainType::try_from(domain_tag).map_err(|_| CodecError::UnknownTag {
            tag: domain_tag,
            what: "domain type",
            offset: 1,
        })?;
        let stream_id = cur.read_i32("stream id")?;
        let flag_bits = cur.read_u8("flags")?;
        let container_tag = cur.read_u8("container type")?;
        let container_type = DataType::try_from(container_tag).ok();

        let seq_num = if flag_bits & flags::HAS_SEQ_NUM != 0 {
            Some(cur.read_u32("seq num")?)
        } else {
            None
        };

        let state = if flag_bits & flags::HAS_STATE != 0 {
            Some(decode_state(&mut cur)?)
        } else {
            None
        };

        let key = if flag_bits & flags::HAS_MSG_KEY != 0 {
            Some(decode_key(buf, &mut cur)?)
        } else {
            None
        };

        let payload = &buf[cur.position()..];
        Ok(RawMsg {
            msg_class,
            domain_type,
            stream_id,
            flags: flag_bits,
            container_type,
            seq_num,
            state,
            key,
            payload,
        })
    }
}

fn decode_state(cur: &mut DecodeCursor<'_>) -> CodecResult<State> {
    let stream_tag = cur.read_u8("stream state")?;
    let data_tag = cur.read_u8("data state")?;
    let code_tag = cur.read_u8("state code")?;
    let text = cur.read_prefixed("state text")?;
    Ok(State {
        stream_state: StreamState::try_from(stream_tag).map_err(|_| CodecError::UnknownTag {
            tag: stream_tag,
            what: "stream state",
            offset: cur.position(),
        })?,
        data_state: DataState::try_from(data_tag).map_err(|_| CodecError::UnknownTag {
            tag: data_tag,
            what: "data state",
            offset: cur.position(),
        })?,
        code: StateCode::try_from(code_tag).unwrap_or(StateCode::None),
        text: BufferValue::from_bytes(text),
    })
}

fn decode_key<'a>(buf: &'a [u8], cur: &mut DecodeCursor<'a>) -> CodecResult<RawMsgKey<'a>> {
    let kf = cur.read_u8("key flags")?;
    let mut key = RawMsgKey::default();
    if kf & key_flags::HAS_NAME != 0 {
        key.name = Some(cur.read_prefixed("key name")?);
    }
    if kf & key_flags::HAS_NAME_TYPE != 0 {
        key.name_type = Some(cur.read_u8("key name type")?);
    }
    if kf & key_flags::HAS_SERVICE_ID != 0 {
        key.service_id = Some(cur.read_u16("key service id")?);
    }
    if kf & key_flags::HAS_ATTRIB != 0 {
        // Capture the attrib element list with its length prefix so the
        // message decoder can hand it to ElementListDecoder untouched.
        let start = cur.position();
        let declared = cur.read_u16("key attrib length")? as usize;
        cur.skip(declared, "key attrib body")?;
        key.attrib = Some(&buf[start..cur.position()]);
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_with_all_sections() {
        let state = State::default();
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 256, 14, 1);
        let mut spec = HeaderSpec::new(MsgClass::Refresh, DomainType::Login, 1);
        spec.seq_num = Some(9);
        spec.state = Some(&state);
        spec.solicited = true;
        spec.refresh_complete = true;
        spec.key_name = Some(b"user");
        spec.key_name_type = Some(1);
        encode_header(&mut enc, &spec).unwrap();
        enc.write_bytes(b"PAYLOAD").unwrap();

        let raw = RawMsg::decode(&buf).unwrap();
        assert_eq!(raw.msg_class, MsgClass::Refresh);
        assert_eq!(raw.domain_type, DomainType::Login);
        assert_eq!(raw.stream_id, 1);
        assert_eq!(raw.seq_num, Some(9));
        assert!(raw.solicited());
        assert!(raw.flags & flags::REFRESH_COMPLETE != 0);
        let key = raw.key.unwrap();
        assert_eq!(key.name, Some(&b"user"[..]));
        assert_eq!(key.name_type, Some(1));
        assert_eq!(key.service_id, None);
        assert_eq!(raw.payload, b"PAYLOAD");
    }

    #[test]
    fn sections_behind_clear_flags_are_absent() {
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 64, 14, 1);
        let spec = HeaderSpec::new(MsgClass::Close, DomainType::Login, 5);
        encode_header(&mut enc, &spec).unwrap();

        let raw = RawMsg::decode(&buf).unwrap();
        assert_eq!(raw.msg_class, MsgClass::Close);
        assert!(raw.seq_num.is_none());
        assert!(raw.state.is_none());
        assert!(raw.key.is_none());
        assert!(raw.payload.is_empty());
    }

    #[test]
    fn unknown_msg_class_tag_is_rejected() {
        let buf = [0x63u8, 1, 0, 0, 0, 1, 0, 0];
        let err = RawMsg::decode(&buf).unwrap_err();
        assert!(matches!(err, CodecError::UnknownTag { what: "msg class", .. }));
    }
}
