//! Directory domain messages.
//!
//! The directory stream advertises the services a provider offers. The
//! harness needs service identification, service/accepting state and a QoS
//! the consumer echoes on its item requests; the service fragments here
//! carry exactly that.

use crate::cursor::{DecodeCursor, EncodeCursor};
use crate::element_list::{ElementListDecoder, ElementListEncoder};
use crate::error::{CodecError, CodecResult};
use crate::msg::{encode_header, HeaderSpec, RawMsg};
use types::{names, BufferValue, DataType, DomainType, MsgClass, Qos, State};

/// Directory stream id used by both harnesses.
pub const DIRECTORY_STREAM_ID: i32 = 2;

/// Filter bits selecting which service fragments a peer wants.
pub mod filter {
    pub const INFO: u32 = 0x1;
    pub const STATE: u32 = 0x2;
}

/// Service info fragment: identity and capabilities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceInfo {
    pub name: BufferValue,
    pub vendor: BufferValue,
    pub is_source: Option<u64>,
    pub qos: Option<Qos>,
}

impl ServiceInfo {
    pub fn clear(&mut self) {
        self.name.clear();
        self.vendor.clear();
        self.is_source = None;
        self.qos = None;
    }

    fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut list = ElementListEncoder::init(enc)?;
        if !self.name.is_empty() {
            list.add_ascii(enc, names::SERVICE_NAME, self.name.as_bytes())?;
        }
        if !self.vendor.is_empty() {
            list.add_ascii(enc, names::SERVICE_VENDOR, self.vendor.as_bytes())?;
        }
        if let Some(v) = self.is_source {
            list.add_uint(enc, names::SERVICE_IS_SOURCE, v)?;
        }
        if let Some(qos) = &self.qos {
            let value = [qos.timeliness, qos.rate, qos.dynamic as u8];
            list.add_buffer(enc, names::QOS, &value)?;
        }
        list.complete(enc)
    }

    fn decode(&mut self, cur: &mut DecodeCursor<'_>) -> CodecResult<()> {
        let mut list = ElementListDecoder::init(cur)?;
        while let Some(entry) = list.decode_next()? {
            match entry.name {
                n if n == names::SERVICE_NAME => self.name.set(entry.expect_bytes()?),
                n if n == names::SERVICE_VENDOR => self.vendor.set(entry.expect_bytes()?),
                n if n == names::SERVICE_IS_SOURCE => self.is_source = Some(entry.expect_uint()?),
                n if n == names::QOS => {
                    let bytes = entry.expect_bytes()?;
                    if bytes.len() != 3 {
                        return Err(CodecError::decode(0, "qos element must be 3 bytes"));
                    }
                    self.qos = Some(Qos {
                        timeliness: bytes[0],
                        rate: bytes[1],
                        dynamic: bytes[2] != 0,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Service state fragment: up/down and request acceptance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceState {
    pub service_state: u64,
    pub accepting_requests: Option<u64>,
}

impl ServiceState {
    pub fn clear(&mut self) {
        self.service_state = 0;
        self.accepting_requests = None;
    }

    pub fn is_up(&self) -> bool {
        self.service_state != 0 && self.accepting_requests.unwrap_or(1) != 0
    }

    fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut list = ElementListEncoder::init(enc)?;
        list.add_uint(enc, names::SERVICE_STATE, self.service_state)?;
        if let Some(v) = self.accepting_requests {
            list.add_uint(enc, names::ACCEPTING_REQUESTS, v)?;
        }
        list.complete(enc)
    }

    fn decode(&mut self, cur: &mut DecodeCursor<'_>) -> CodecResult<()> {
        let mut list = ElementListDecoder::init(cur)?;
        while let Some(entry) = list.decode_next()? {
            match entry.name {
                n if n == names::SERVICE_STATE => self.service_state = entry.expect_uint()?,
                n if n == names::ACCEPTING_REQUESTS => {
                    self.accepting_requests = Some(entry.expect_uint()?)
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// One advertised service with its optional fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Service {
    pub service_id: u16,
    pub info: Option<ServiceInfo>,
    pub state: Option<ServiceState>,
}

impl Service {
    pub fn clear(&mut self) {
        self.service_id = 0;
        self.info = None;
        self.state = None;
    }

    fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        enc.write_u16(self.service_id)?;
        let mut present = 0u8;
        if self.info.is_some() {
            present |= filter::INFO as u8;
        }
        if self.state.is_some() {
            present |= filter::STATE as u8;
        }
        enc.write_u8(present)?;
        if let Some(info) = &self.info {
            info.encode(enc)?;
        }
        if let Some(state) = &self.state {
            state.encode(enc)?;
        }
        Ok(())
    }

    fn decode(cur: &mut DecodeCursor<'_>) -> CodecResult<Service> {
        let service_id = cur.read_u16("service id")?;
        let present = cur.read_u8("service fragments")?;
        let mut service = Service {
            service_id,
            ..Default::default()
        };
        if present & filter::INFO as u8 != 0 {
            let mut info = ServiceInfo::default();
            info.decode(cur)?;
            service.info = Some(info);
        }
        if present & filter::STATE as u8 != 0 {
            let mut state = ServiceState::default();
            state.decode(cur)?;
            service.state = Some(state);
        }
        Ok(service)
    }
}

fn encode_service_payload(enc: &mut EncodeCursor<'_>, services: &[Service]) -> CodecResult<()> {
    enc.write_u16(services.len() as u16)?;
    for service in services {
        service.encode(enc)?;
    }
    Ok(())
}

fn decode_service_payload(payload: &[u8]) -> CodecResult<Vec<Service>> {
    let mut cur = DecodeCursor::new(payload);
    let count = cur.read_u16("service count")? as usize;
    let mut services = Vec::with_capacity(count);
    for _ in 0..count {
        services.push(Service::decode(&mut cur)?);
    }
    Ok(services)
}

/// Consumer's request for the provider's service directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryRequest {
    pub stream_id: i32,
    pub filter: u32,
    pub streaming: bool,
}

impl Default for DirectoryRequest {
    fn default() -> Self {
        Self {
            stream_id: DIRECTORY_STREAM_ID,
            filter: filter::INFO | filter::STATE,
            streaming: true,
        }
    }
}

impl DirectoryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Request, DomainType::Directory, self.stream_id);
        spec.streaming = self.streaming;
        encode_header(enc, &spec)?;
        enc.write_u32(self.filter)
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
        self.streaming = raw.streaming();
        let mut cur = DecodeCursor::new(raw.payload);
        self.filter = cur.read_u32("directory filter")?;
        Ok(())
    }
}

/// Provider's answer: the full service list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryRefresh {
    pub stream_id: i32,
    pub filter: u32,
    pub solicited: bool,
    pub seq_num: Option<u32>,
    pub state: State,
    pub services: Vec<Service>,
}

impl DirectoryRefresh {
    pub fn new() -> Self {
        let mut msg = Self::default();
        msg.clear();
        msg
    }

    pub fn clear(&mut self) {
        self.stream_id = DIRECTORY_STREAM_ID;
        self.filter = filter::INFO | filter::STATE;
        self.solicited = false;
        self.seq_num = None;
        self.state.clear();
        self.services.clear();
    }

    pub fn service_by_name(&self, name: &[u8]) -> Option<&Service> {
        self.services.iter().find(|s| {
            s.info
                .as_ref()
                .map(|info| info.name.as_bytes() == name)
                .unwrap_or(false)
        })
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Refresh, DomainType::Directory, self.stream_id);
        spec.state = Some(&self.state);
        spec.solicited = self.solicited;
        spec.refresh_complete = true;
        spec.seq_num = self.seq_num;
        spec.container_type = Some(DataType::ElementList);
        encode_header(enc, &spec)?;
        enc.write_u32(self.filter)?;
        encode_service_payload(enc, &self.services)
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
        self.seq_num = raw.seq_num;
        if let Some(state) = &raw.state {
            state.copy_into(&mut self.state);
        }
        let mut cur = DecodeCursor::new(raw.payload);
        self.filter = cur.read_u32("directory filter")?;
        self.services = decode_service_payload(&raw.payload[cur.position()..])?;
        Ok(())
    }
}

/// Incremental service change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryUpdate {
    pub stream_id: i32,
    pub filter: u32,
    pub seq_num: Option<u32>,
    pub services: Vec<Service>,
}

impl DirectoryUpdate {
    pub fn new() -> Self {
        let mut msg = Self::default();
        msg.clear();
        msg
    }

    pub fn clear(&mut self) {
        self.stream_id = DIRECTORY_STREAM_ID;
        self.filter = filter::INFO | filter::STATE;
        self.seq_num = None;
        self.services.clear();
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Update, DomainType::Directory, self.stream_id);
        spec.seq_num = self.seq_num;
        spec.container_type = Some(DataType::ElementList);
        encode_header(enc, &spec)?;
        enc.write_u32(self.filter)?;
        encode_service_payload(enc, &self.services)
    }

    pub fn decode(&mut self, raw: &RawMsg<'_>) -> CodecResult<()> {
        self.clear();
        if raw.msg_class != MsgClass::Update {
            return Err(CodecError::UnexpectedMsgClass {
                expected: MsgClass::Update,
                got: raw.msg_class,
            });
        }
        self.stream_id = raw.stream_id;
        self.seq_num = raw.seq_num;
        let mut cur = DecodeCursor::new(raw.payload);
        self.filter = cur.read_u32("directory filter")?;
        self.services = decode_service_payload(&raw.payload[cur.position()..])?;
        Ok(())
    }
}

/// Directory stream state change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryStatus {
    pub stream_id: i32,
    pub state: Option<State>,
}

impl DirectoryStatus {
    pub fn new() -> Self {
        let mut msg = Self::default();
        msg.clear();
        msg
    }

    pub fn clear(&mut self) {
        self.stream_id = DIRECTORY_STREAM_ID;
        self.state = None;
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Status, DomainType::Directory, self.stream_id);
        spec.state = self.state.as_ref();
        encode_header(enc, &spec)
    }

    pub fn decode(&mut self, raw: &RawMsg<'_>) -> CodecResult<()> {
        self.clear();
        if raw.msg_class != MsgClass::Status {
            return Err(CodecError::UnexpectedMsgClass {
                expected: MsgClass::Status,
                got: raw.msg_class,
            });
        }
        self.stream_id = raw.stream_id;
        if let Some(state) = &raw.state {
            let mut copy = State::default();
            state.copy_into(&mut copy);
            self.state = Some(copy);
        }
        Ok(())
    }
}

/// Closes the directory stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryClose {
    pub stream_id: i32,
}

impl Default for DirectoryClose {
    fn default() -> Self {
        Self {
            stream_id: DIRECTORY_STREAM_ID,
        }
    }
}

impl DirectoryClose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.stream_id = DIRECTORY_STREAM_ID;
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let spec = HeaderSpec::new(MsgClass::Close, DomainType::Directory, self.stream_id);
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
    use types::{DataState, StreamState};

    fn sample_service() -> Service {
        Service {
            service_id: 1,
            info: Some(ServiceInfo {
                name: BufferValue::from_bytes(b"DIRECT_FEED"),
                vendor: BufferValue::from_bytes(b"Feedbench"),
                is_source: Some(1),
                qos: Some(Qos::realtime()),
            }),
            state: Some(ServiceState {
                service_state: 1,
                accepting_requests: Some(1),
            }),
        }
    }

    #[test]
    fn refresh_round_trips_service_fragments() {
        let mut refresh = DirectoryRefresh::new();
        refresh.solicited = true;
        refresh.state.stream_state = StreamState::Open;
        refresh.state.data_state = DataState::Ok;
        refresh.services.push(sample_service());

        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 1024, 14, 1);
        refresh.encode(&mut enc).unwrap();

        let raw = RawMsg::decode(&buf).unwrap();
        let mut decoded = DirectoryRefresh::new();
        decoded.decode(&raw).unwrap();
        assert_eq!(decoded, refresh);
        assert!(decoded.service_by_name(b"DIRECT_FEED").is_some());
        assert!(decoded.services[0].state.as_ref().unwrap().is_up());
    }

    #[test]
    fn request_round_trips_filter() {
        let mut request = DirectoryRequest::new();
        request.filter = filter::INFO;

        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 128, 14, 1);
        request.encode(&mut enc).unwrap();

        let raw = RawMsg::decode(&buf).unwrap();
        let mut decoded = DirectoryRequest::new();
        decoded.decode(&raw).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn update_without_info_fragment() {
        let mut update = DirectoryUpdate::new();
        update.services.push(Service {
            service_id: 1,
            info: None,
            state: Some(ServiceState {
                service_state: 0,
                accepting_requests: Some(0),
            }),
        });

        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 256, 14, 1);
        update.encode(&mut enc).unwrap();

        let raw = RawMsg::decode(&buf).unwrap();
        let mut decoded = DirectoryUpdate::new();
        decoded.decode(&raw).unwrap();
        assert_eq!(decoded, update);
        assert!(!decoded.services[0].state.as_ref().unwrap().is_up());
    }
}
