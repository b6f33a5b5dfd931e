//! Login domain messages.
//!
//! The login stream is the first stream on every connection: a request
//! carrying user identity attributes, a refresh answering it with the
//! provider's supported features and (optionally) a standby server list,
//! status/close for lifecycle, and two generic-message exchanges that ride
//! the established stream (round-trip latency probes and consumer
//! connection status).

use crate::cursor::{DecodeCursor, EncodeCursor};
use crate::element_list::{ElementListDecoder, ElementListEncoder};
use crate::error::{CodecError, CodecResult};
use crate::msg::{self, encode_header, HeaderSpec, RawMsg};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use types::{
    names, BufferValue, DataType, DomainType, MsgClass, ServerType, State, UserNameType,
};

/// Login stream id used by both harnesses.
pub const LOGIN_STREAM_ID: i32 = 1;

/// Key name identifying a consumer connection status generic message.
pub const CONS_CONN_STATUS_NAME: &[u8] = b"ConsumerConnectionStatus";

/// Generic-message header bit marking a provider-driven RTT probe. Header
/// flag bits are class-dependent; this value is only meaningful on the
/// login domain's generic messages.
const PROVIDER_DRIVEN_FLAG: u8 = msg::flags::PRIVATE_STREAM;

/// Unit requested when reading an RTT latency out of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
}

fn monotonic_ns() -> u64 {
    // Wall-clock nanos; both ends of the RTT exchange stamp from the same
    // process in the harness, so the delta stays meaningful.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Nested sub-structures
// ---------------------------------------------------------------------------

/// User identity attributes nested in requests and refreshes.
///
/// Buffer-typed fields treat empty as absent, matching how peers encode
/// them. `single_open` and `allow_suspect_data` default to 1 when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginAttrib {
    pub application_id: BufferValue,
    pub application_name: BufferValue,
    pub position: BufferValue,
    pub provide_permission_profile: Option<u64>,
    pub provide_permission_expressions: Option<u64>,
    pub single_open: Option<u64>,
    pub allow_suspect_data: Option<u64>,
    pub support_rtt_monitoring: Option<u64>,
}

impl LoginAttrib {
    pub fn clear(&mut self) {
        self.application_id.clear();
        self.application_name.clear();
        self.position.clear();
        self.provide_permission_profile = None;
        self.provide_permission_expressions = None;
        self.single_open = None;
        self.allow_suspect_data = None;
        self.support_rtt_monitoring = None;
    }

    pub fn is_empty(&self) -> bool {
        self.application_id.is_empty()
            && self.application_name.is_empty()
            && self.position.is_empty()
            && self.provide_permission_profile.is_none()
            && self.provide_permission_expressions.is_none()
            && self.single_open.is_none()
            && self.allow_suspect_data.is_none()
            && self.support_rtt_monitoring.is_none()
    }

    /// Absent means 1: streams are single-open unless the peer says not.
    pub fn single_open_or_default(&self) -> u64 {
        self.single_open.unwrap_or(1)
    }

    pub fn allow_suspect_data_or_default(&self) -> u64 {
        self.allow_suspect_data.unwrap_or(1)
    }

    pub fn copy_into(&self, dest: &mut LoginAttrib) {
        self.application_id.copy_into(&mut dest.application_id);
        self.application_name.copy_into(&mut dest.application_name);
        self.position.copy_into(&mut dest.position);
        dest.provide_permission_profile = self.provide_permission_profile;
        dest.provide_permission_expressions = self.provide_permission_expressions;
        dest.single_open = self.single_open;
        dest.allow_suspect_data = self.allow_suspect_data;
        dest.support_rtt_monitoring = self.support_rtt_monitoring;
    }

    fn encode_entries(
        &self,
        enc: &mut EncodeCursor<'_>,
        list: &mut ElementListEncoder,
    ) -> CodecResult<()> {
        if !self.application_id.is_empty() {
            list.add_ascii(enc, names::APPLICATION_ID, self.application_id.as_bytes())?;
        }
        if !self.application_name.is_empty() {
            list.add_ascii(enc, names::APPLICATION_NAME, self.application_name.as_bytes())?;
        }
        if !self.position.is_empty() {
            list.add_ascii(enc, names::POSITION, self.position.as_bytes())?;
        }
        if let Some(v) = self.provide_permission_profile {
            list.add_uint(enc, names::PROVIDE_PERM_PROFILE, v)?;
        }
        if let Some(v) = self.provide_permission_expressions {
            list.add_uint(enc, names::PROVIDE_PERM_EXPRESSIONS, v)?;
        }
        if let Some(v) = self.single_open {
            list.add_uint(enc, names::SINGLE_OPEN, v)?;
        }
        if let Some(v) = self.allow_suspect_data {
            list.add_uint(enc, names::ALLOW_SUSPECT_DATA, v)?;
        }
        if let Some(v) = self.support_rtt_monitoring {
            list.add_uint(enc, names::ROUND_TRIP_LATENCY, v)?;
        }
        Ok(())
    }

    /// Returns true if the entry was consumed as an attrib element.
    fn decode_entry(&mut self, entry: &crate::element_list::ElementEntry<'_>) -> CodecResult<bool> {
        match entry.name {
            n if n == names::APPLICATION_ID => {
                self.application_id.set(entry.expect_bytes()?);
            }
            n if n == names::APPLICATION_NAME => {
                self.application_name.set(entry.expect_bytes()?);
            }
            n if n == names::POSITION => {
                self.position.set(entry.expect_bytes()?);
            }
            n if n == names::PROVIDE_PERM_PROFILE => {
                self.provide_permission_profile = Some(entry.expect_uint()?);
            }
            n if n == names::PROVIDE_PERM_EXPRESSIONS => {
                self.provide_permission_expressions = Some(entry.expect_uint()?);
            }
            n if n == names::SINGLE_OPEN => {
                self.single_open = Some(entry.expect_uint()?);
            }
            n if n == names::ALLOW_SUSPECT_DATA => {
                self.allow_suspect_data = Some(entry.expect_uint()?);
            }
            n if n == names::ROUND_TRIP_LATENCY => {
                self.support_rtt_monitoring = Some(entry.expect_uint()?);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

impl fmt::Display for LoginAttrib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.application_id.is_empty() {
            writeln!(f, "\tapplicationId: {}", self.application_id)?;
        }
        if !self.application_name.is_empty() {
            writeln!(f, "\tapplicationName: {}", self.application_name)?;
        }
        if !self.position.is_empty() {
            writeln!(f, "\tposition: {}", self.position)?;
        }
        if let Some(v) = self.single_open {
            writeln!(f, "\tsingleOpen: {v}")?;
        }
        if let Some(v) = self.allow_suspect_data {
            writeln!(f, "\tallowSuspectData: {v}")?;
        }
        if let Some(v) = self.support_rtt_monitoring {
            writeln!(f, "\tsupportRoundTripLatencyMonitoring: {v}")?;
        }
        Ok(())
    }
}

/// Batch support bits packed into the `SupportBatchRequests` element.
pub mod batch_support {
    pub const REQUESTS: u64 = 0x1;
    pub const REISSUES: u64 = 0x2;
    pub const CLOSES: u64 = 0x4;
}

/// Features a provider advertises on its login refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginSupportFeatures {
    pub support_post: Option<u64>,
    /// Bitmask of `batch_support` bits.
    pub support_batch: Option<u64>,
    pub support_view: Option<u64>,
    pub support_standby: Option<u64>,
    pub support_opt_pause: Option<u64>,
    pub support_provider_dictionary_download: Option<u64>,
}

impl LoginSupportFeatures {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn copy_into(&self, dest: &mut LoginSupportFeatures) {
        dest.clone_from(self);
    }

    fn encode_entries(
        &self,
        enc: &mut EncodeCursor<'_>,
        list: &mut ElementListEncoder,
    ) -> CodecResult<()> {
        if let Some(v) = self.support_post {
            list.add_uint(enc, names::SUPPORT_POST, v)?;
        }
        if let Some(v) = self.support_batch {
            list.add_uint(enc, names::SUPPORT_BATCH, v)?;
        }
        if let Some(v) = self.support_view {
            list.add_uint(enc, names::SUPPORT_VIEW, v)?;
        }
        if let Some(v) = self.support_standby {
            list.add_uint(enc, names::SUPPORT_STANDBY, v)?;
        }
        if let Some(v) = self.support_opt_pause {
            list.add_uint(enc, names::SUPPORT_OPT_PAUSE, v)?;
        }
        if let Some(v) = self.support_provider_dictionary_download {
            list.add_uint(enc, names::SUPPORT_PROVIDER_DICT_DOWNLOAD, v)?;
        }
        Ok(())
    }

    fn decode_entry(&mut self, entry: &crate::element_list::ElementEntry<'_>) -> CodecResult<bool> {
        match entry.name {
            n if n == names::SUPPORT_POST => self.support_post = Some(entry.expect_uint()?),
            n if n == names::SUPPORT_BATCH => self.support_batch = Some(entry.expect_uint()?),
            n if n == names::SUPPORT_VIEW => self.support_view = Some(entry.expect_uint()?),
            n if n == names::SUPPORT_STANDBY => self.support_standby = Some(entry.expect_uint()?),
            n if n == names::SUPPORT_OPT_PAUSE => {
                self.support_opt_pause = Some(entry.expect_uint()?)
            }
            n if n == names::SUPPORT_PROVIDER_DICT_DOWNLOAD => {
                self.support_provider_dictionary_download = Some(entry.expect_uint()?)
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// One server advertised in a connection config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfo {
    pub host: BufferValue,
    pub port: u32,
    pub load_factor: u32,
    pub server_type: ServerType,
}

impl ServerInfo {
    pub fn copy_into(&self, dest: &mut ServerInfo) {
        self.host.copy_into(&mut dest.host);
        dest.port = self.port;
        dest.load_factor = self.load_factor;
        dest.server_type = self.server_type;
    }
}

/// Standby/failover advertisement carried in a login refresh payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginConnectionConfig {
    pub num_standby_servers: u32,
    pub servers: Vec<ServerInfo>,
}

impl LoginConnectionConfig {
    pub fn clear(&mut self) {
        self.num_standby_servers = 0;
        self.servers.clear();
    }

    pub fn copy_into(&self, dest: &mut LoginConnectionConfig) {
        dest.num_standby_servers = self.num_standby_servers;
        dest.servers.clear();
        for server in &self.servers {
            let mut copy = ServerInfo::default();
            server.copy_into(&mut copy);
            dest.servers.push(copy);
        }
    }

    /// Encoded as a nested server-list entry inside the payload element list.
    fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut list = ElementListEncoder::init(enc)?;
        let mark = list.begin_nested(enc, names::CONNECTION_CONFIG, DataType::ServerList)?;
        enc.write_u32(self.num_standby_servers)?;
        enc.write_u16(self.servers.len() as u16)?;
        for server in &self.servers {
            enc.write_prefixed(server.host.as_bytes())?;
            enc.write_u32(server.port)?;
            enc.write_u32(server.load_factor)?;
            enc.write_u8(server.server_type.into())?;
        }
        list.end_nested(enc, mark)?;
        list.complete(enc)
    }

    fn decode_body(&mut self, cur: &mut DecodeCursor<'_>) -> CodecResult<()> {
        self.num_standby_servers = cur.read_u32("num standby servers")?;
        let count = cur.read_u16("server count")? as usize;
        self.servers.clear();
        for _ in 0..count {
            let host = cur.read_prefixed("server host")?;
            let port = cur.read_u32("server port")?;
            let load_factor = cur.read_u32("server load factor")?;
            let type_tag = cur.read_u8("server type")?;
            self.servers.push(ServerInfo {
                host: BufferValue::from_bytes(host),
                port,
                load_factor,
                server_type: ServerType::try_from(type_tag).map_err(|_| {
                    CodecError::UnknownTag {
                        tag: type_tag,
                        what: "server type",
                        offset: cur.position(),
                    }
                })?,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LoginRequest
// ---------------------------------------------------------------------------

/// Consumer's opening message on a connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginRequest {
    pub stream_id: i32,
    pub user_name: BufferValue,
    pub user_name_type: Option<UserNameType>,
    pub role: Option<u64>,
    pub instance_id: BufferValue,
    pub password: BufferValue,
    pub download_connection_config: Option<u64>,
    pub attrib: LoginAttrib,
}

impl LoginRequest {
    pub fn new() -> Self {
        let mut msg = Self::default();
        msg.clear();
        msg
    }

    pub fn clear(&mut self) {
        self.stream_id = LOGIN_STREAM_ID;
        self.user_name.clear();
        self.user_name_type = None;
        self.role = None;
        self.instance_id.clear();
        self.password.clear();
        self.download_connection_config = None;
        self.attrib.clear();
    }

    pub fn copy_into(&self, dest: &mut LoginRequest) {
        dest.stream_id = self.stream_id;
        self.user_name.copy_into(&mut dest.user_name);
        dest.user_name_type = self.user_name_type;
        dest.role = self.role;
        self.instance_id.copy_into(&mut dest.instance_id);
        self.password.copy_into(&mut dest.password);
        dest.download_connection_config = self.download_connection_config;
        self.attrib.copy_into(&mut dest.attrib);
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Request, DomainType::Login, self.stream_id);
        spec.streaming = true;
        spec.key_name = Some(self.user_name.as_bytes());
        spec.key_name_type = self.user_name_type.map(|t| t.into());
        spec.key_attrib_follows = true;
        encode_header(enc, &spec)?;

        let mut list = ElementListEncoder::init(enc)?;
        self.attrib.encode_entries(enc, &mut list)?;
        if !self.instance_id.is_empty() {
            list.add_ascii(enc, names::INSTANCE_ID, self.instance_id.as_bytes())?;
        }
        if !self.password.is_empty() {
            list.add_ascii(enc, names::PASSWORD, self.password.as_bytes())?;
        }
        if let Some(role) = self.role {
            list.add_uint(enc, names::ROLE, role)?;
        }
        if let Some(v) = self.download_connection_config {
            list.add_uint(enc, names::DOWNLOAD_CONNECTION_CONFIG, v)?;
        }
        list.complete(enc)
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

        let key = raw.key.as_ref().ok_or(CodecError::Missing { what: "login request key" })?;
        if let Some(name) = key.name {
            self.user_name.set(name);
        }
        if let Some(nt) = key.name_type {
            self.user_name_type = Some(UserNameType::try_from(nt).map_err(|_| {
                CodecError::UnknownTag {
                    tag: nt,
                    what: "user name type",
                    offset: 0,
                }
            })?);
        }

        if let Some(attrib) = key.attrib {
            let mut cur = DecodeCursor::new(attrib);
            let mut list = ElementListDecoder::init(&mut cur)?;
            while let Some(entry) = list.decode_next()? {
                if self.attrib.decode_entry(&entry)? {
                    continue;
                }
                match entry.name {
                    n if n == names::INSTANCE_ID => self.instance_id.set(entry.expect_bytes()?),
                    n if n == names::PASSWORD => self.password.set(entry.expect_bytes()?),
                    n if n == names::ROLE => self.role = Some(entry.expect_uint()?),
                    n if n == names::DOWNLOAD_CONNECTION_CONFIG => {
                        self.download_connection_config = Some(entry.expect_uint()?)
                    }
                    _ => {} // forward compatibility: skip unknown elements
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "LoginRequest:")?;
        writeln!(f, "\tstreamId: {}", self.stream_id)?;
        writeln!(f, "\tname: {}", self.user_name)?;
        if let Some(nt) = self.user_name_type {
            writeln!(f, "\tnameType: {nt:?}")?;
        }
        write!(f, "{}", self.attrib)
    }
}

// ---------------------------------------------------------------------------
// LoginRefresh
// ---------------------------------------------------------------------------

/// Provider's answer to a login request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginRefresh {
    pub stream_id: i32,
    pub user_name: BufferValue,
    pub user_name_type: Option<UserNameType>,
    pub state: State,
    pub solicited: bool,
    pub clear_cache: bool,
    pub seq_num: Option<u32>,
    pub attrib: LoginAttrib,
    pub features: LoginSupportFeatures,
    pub connection_config: Option<LoginConnectionConfig>,
}

impl LoginRefresh {
    pub fn new() -> Self {
        let mut msg = Self::default();
        msg.clear();
        msg
    }

    pub fn clear(&mut self) {
        self.stream_id = LOGIN_STREAM_ID;
        self.user_name.clear();
        self.user_name_type = None;
        self.state.clear();
        self.solicited = false;
        self.clear_cache = false;
        self.seq_num = None;
        self.attrib.clear();
        self.features.clear();
        self.connection_config = None;
    }

    pub fn copy_into(&self, dest: &mut LoginRefresh) {
        dest.stream_id = self.stream_id;
        self.user_name.copy_into(&mut dest.user_name);
        dest.user_name_type = self.user_name_type;
        self.state.copy_into(&mut dest.state);
        dest.solicited = self.solicited;
        dest.clear_cache = self.clear_cache;
        dest.seq_num = self.seq_num;
        self.attrib.copy_into(&mut dest.attrib);
        self.features.copy_into(&mut dest.features);
        dest.connection_config = None;
        if let Some(config) = &self.connection_config {
            let mut copy = LoginConnectionConfig::default();
            config.copy_into(&mut copy);
            dest.connection_config = Some(copy);
        }
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Refresh, DomainType::Login, self.stream_id);
        spec.state = Some(&self.state);
        spec.solicited = self.solicited;
        spec.refresh_complete = true;
        spec.clear_cache = self.clear_cache;
        spec.seq_num = self.seq_num;
        if !self.user_name.is_empty() {
            spec.key_name = Some(self.user_name.as_bytes());
        }
        spec.key_name_type = self.user_name_type.map(|t| t.into());
        spec.key_attrib_follows = true;
        if self.connection_config.is_some() {
            spec.container_type = Some(DataType::ElementList);
        }
        encode_header(enc, &spec)?;

        let mut list = ElementListEncoder::init(enc)?;
        self.attrib.encode_entries(enc, &mut list)?;
        self.features.encode_entries(enc, &mut list)?;
        list.complete(enc)?;

        if let Some(config) = &self.connection_config {
            config.encode(enc)?;
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
        self.clear_cache = raw.clear_cache();
        self.seq_num = raw.seq_num;
        if let Some(state) = &raw.state {
            state.copy_into(&mut self.state);
        }

        if let Some(key) = &raw.key {
            if let Some(name) = key.name {
                self.user_name.set(name);
            }
            if let Some(nt) = key.name_type {
                self.user_name_type = UserNameType::try_from(nt).ok();
            }
            if let Some(attrib) = key.attrib {
                let mut cur = DecodeCursor::new(attrib);
                let mut list = ElementListDecoder::init(&mut cur)?;
                while let Some(entry) = list.decode_next()? {
                    if self.attrib.decode_entry(&entry)? {
                        continue;
                    }
                    if self.features.decode_entry(&entry)? {
                        continue;
                    }
                    // Unknown attrib element: skipped.
                }
            }
        }

        if raw.container_type == Some(DataType::ElementList) && !raw.payload.is_empty() {
            let mut cur = DecodeCursor::new(raw.payload);
            let mut list = ElementListDecoder::init(&mut cur)?;
            while let Some(entry) = list.decode_next()? {
                if entry.name == names::CONNECTION_CONFIG {
                    let mut body = entry.expect_nested(DataType::ServerList)?;
                    let mut config = LoginConnectionConfig::default();
                    config.decode_body(&mut body)?;
                    self.connection_config = Some(config);
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for LoginRefresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "LoginRefresh:")?;
        writeln!(f, "\tstreamId: {}", self.stream_id)?;
        writeln!(f, "\tname: {}", self.user_name)?;
        writeln!(f, "\t{}", self.state)?;
        if self.solicited {
            writeln!(f, "\tisSolicited: true")?;
        }
        write!(f, "{}", self.attrib)?;
        if let Some(config) = &self.connection_config {
            writeln!(
                f,
                "\tconnectionConfig: {} servers, {} standby",
                config.servers.len(),
                config.num_standby_servers
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LoginStatus
// ---------------------------------------------------------------------------

/// Unsolicited login stream state change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginStatus {
    pub stream_id: i32,
    pub user_name: BufferValue,
    pub user_name_type: Option<UserNameType>,
    pub state: Option<State>,
}

impl LoginStatus {
    pub fn new() -> Self {
        let mut msg = Self::default();
        msg.clear();
        msg
    }

    pub fn clear(&mut self) {
        self.stream_id = LOGIN_STREAM_ID;
        self.user_name.clear();
        self.user_name_type = None;
        self.state = None;
    }

    pub fn copy_into(&self, dest: &mut LoginStatus) {
        dest.stream_id = self.stream_id;
        self.user_name.copy_into(&mut dest.user_name);
        dest.user_name_type = self.user_name_type;
        dest.state = None;
        if let Some(state) = &self.state {
            let mut copy = State::default();
            state.copy_into(&mut copy);
            dest.state = Some(copy);
        }
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Status, DomainType::Login, self.stream_id);
        spec.state = self.state.as_ref();
        if !self.user_name.is_empty() {
            spec.key_name = Some(self.user_name.as_bytes());
        }
        spec.key_name_type = self.user_name_type.map(|t| t.into());
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
        if let Some(key) = &raw.key {
            if let Some(name) = key.name {
                self.user_name.set(name);
            }
            if let Some(nt) = key.name_type {
                self.user_name_type = UserNameType::try_from(nt).ok();
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LoginClose
// ---------------------------------------------------------------------------

/// Closes the login stream, ending the session.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginClose {
    pub stream_id: i32,
}

impl Default for LoginClose {
    fn default() -> Self {
        Self {
            stream_id: LOGIN_STREAM_ID,
        }
    }
}

impl LoginClose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.stream_id = LOGIN_STREAM_ID;
    }

    pub fn copy_into(&self, dest: &mut LoginClose) {
        dest.stream_id = self.stream_id;
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let spec = HeaderSpec::new(MsgClass::Close, DomainType::Login, self.stream_id);
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

// ---------------------------------------------------------------------------
// LoginRtt
// ---------------------------------------------------------------------------

/// Round-trip latency probe riding the login stream as a generic message.
///
/// The provider stamps `ticks` and sends; the consumer echoes the message
/// back; on return the provider computes the round trip from its own clock.
/// Values live in nanoseconds internally; unit conversion happens only at
/// the read boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginRtt {
    pub stream_id: i32,
    pub ticks: u64,
    pub rt_latency: Option<u64>,
    pub tcp_retrans: Option<u64>,
    pub provider_driven: bool,
}

impl LoginRtt {
    pub fn new() -> Self {
        let mut msg = Self::default();
        msg.clear();
        msg
    }

    pub fn clear(&mut self) {
        self.stream_id = LOGIN_STREAM_ID;
        self.ticks = 0;
        self.rt_latency = None;
        self.tcp_retrans = None;
        self.provider_driven = false;
    }

    pub fn copy_into(&self, dest: &mut LoginRtt) {
        dest.stream_id = self.stream_id;
        dest.ticks = self.ticks;
        dest.rt_latency = self.rt_latency;
        dest.tcp_retrans = self.tcp_retrans;
        dest.provider_driven = self.provider_driven;
    }

    /// Stamp the current monotonic time; called by the initiating side.
    pub fn update_rtt_actual_ticks(&mut self) {
        self.ticks = monotonic_ns();
    }

    /// Compute now − ticks and store it as the round-trip latency.
    ///
    /// TODO: the microsecond conversion multiplies where a division is
    /// expected; confirm against deployed peers before changing, and update
    /// `rtt_latency_micro_conversion` alongside.
    pub fn calculate_rtt_latency(&mut self, unit: TimeUnit) -> u64 {
        let mut latency = monotonic_ns().saturating_sub(self.ticks);
        if unit == TimeUnit::Microseconds {
            latency *= 1000;
        }
        self.rt_latency = Some(latency);
        latency
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Generic, DomainType::Login, self.stream_id);
        spec.container_type = Some(DataType::ElementList);
        spec.private_stream = self.provider_driven; // PROVIDER_DRIVEN_FLAG
        encode_header(enc, &spec)?;

        let mut list = ElementListEncoder::init(enc)?;
        list.add_uint(enc, names::TICKS, self.ticks)?;
        if let Some(v) = self.rt_latency {
            list.add_uint(enc, names::ROUND_TRIP_LATENCY, v)?;
        }
        if let Some(v) = self.tcp_retrans {
            list.add_uint(enc, names::TCP_RETRANS, v)?;
        }
        list.complete(enc)
    }

    pub fn decode(&mut self, raw: &RawMsg<'_>) -> CodecResult<()> {
        self.clear();
        if raw.msg_class != MsgClass::Generic {
            return Err(CodecError::UnexpectedMsgClass {
                expected: MsgClass::Generic,
                got: raw.msg_class,
            });
        }
        self.stream_id = raw.stream_id;
        self.provider_driven = raw.flags & PROVIDER_DRIVEN_FLAG != 0;

        let mut cur = DecodeCursor::new(raw.payload);
        let mut list = ElementListDecoder::init(&mut cur)?;
        let mut saw_ticks = false;
        while let Some(entry) = list.decode_next()? {
            match entry.name {
                n if n == names::TICKS => {
                    self.ticks = entry.expect_uint()?;
                    saw_ticks = true;
                }
                n if n == names::ROUND_TRIP_LATENCY => {
                    self.rt_latency = Some(entry.expect_uint()?)
                }
                n if n == names::TCP_RETRANS => self.tcp_retrans = Some(entry.expect_uint()?),
                _ => {}
            }
        }
        if !saw_ticks {
            return Err(CodecError::Missing { what: "rtt ticks element" });
        }
        Ok(())
    }
}

impl fmt::Display for LoginRtt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "LoginRtt:")?;
        writeln!(f, "\tstreamId: {}", self.stream_id)?;
        writeln!(f, "\tticks: {}", self.ticks)?;
        if let Some(v) = self.rt_latency {
            writeln!(f, "\trtLatency: {v}")?;
        }
        if let Some(v) = self.tcp_retrans {
            writeln!(f, "\ttcpRetrans: {v}")?;
        }
        writeln!(f, "\tproviderDriven: {}", self.provider_driven)
    }
}

// ---------------------------------------------------------------------------
// LoginConsumerConnectionStatus
// ---------------------------------------------------------------------------

/// Warm standby mode directive sent by a consumer to a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginConsumerConnectionStatus {
    pub stream_id: i32,
    pub warm_standby_mode: Option<u64>,
}

impl LoginConsumerConnectionStatus {
    pub fn new() -> Self {
        let mut msg = Self::default();
        msg.clear();
        msg
    }

    pub fn clear(&mut self) {
        self.stream_id = LOGIN_STREAM_ID;
        self.warm_standby_mode = None;
    }

    pub fn copy_into(&self, dest: &mut LoginConsumerConnectionStatus) {
        dest.stream_id = self.stream_id;
        dest.warm_standby_mode = self.warm_standby_mode;
    }

    pub fn encode(&self, enc: &mut EncodeCursor<'_>) -> CodecResult<()> {
        let mut spec = HeaderSpec::new(MsgClass::Generic, DomainType::Login, self.stream_id);
        spec.container_type = Some(DataType::ElementList);
        spec.key_name = Some(CONS_CONN_STATUS_NAME);
        encode_header(enc, &spec)?;

        let mut list = ElementListEncoder::init(enc)?;
        if let Some(mode) = self.warm_standby_mode {
            list.add_uint(enc, names::WARM_STANDBY_MODE, mode)?;
        }
        list.complete(enc)
    }

    pub fn decode(&mut self, raw: &RawMsg<'_>) -> CodecResult<()> {
        self.clear();
        if raw.msg_class != MsgClass::Generic {
            return Err(CodecError::UnexpectedMsgClass {
                expected: MsgClass::Generic,
                got: raw.msg_class,
            });
        }
        self.stream_id = raw.stream_id;
        let mut cur = DecodeCursor::new(raw.payload);
        let mut list = ElementListDecoder::init(&mut cur)?;
        while let Some(entry) = list.decode_next()? {
            if entry.name == names::WARM_STANDBY_MODE {
                self.warm_standby_mode = Some(entry.expect_uint()?);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LoginMsg sum type
// ---------------------------------------------------------------------------

/// Any login-domain message, decoded by message class.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginMsg {
    Request(LoginRequest),
    Refresh(LoginRefresh),
    Status(LoginStatus),
    Close(LoginClose),
    Rtt(LoginRtt),
    ConsumerConnectionStatus(LoginConsumerConnectionStatus),
}

impl LoginMsg {
    /// Dispatch on the raw message's class (and, for generics, its key name).
    pub fn decode(raw: &RawMsg<'_>) -> CodecResult<LoginMsg> {
        match raw.msg_class {
            MsgClass::Request => {
                let mut msg = LoginRequest::new();
                msg.decode(raw)?;
                Ok(LoginMsg::Request(msg))
            }
            MsgClass::Refresh => {
                let mut msg = LoginRefresh::new();
                msg.decode(raw)?;
                Ok(LoginMsg::Refresh(msg))
            }
            MsgClass::Status => {
                let mut msg = LoginStatus::new();
                msg.decode(raw)?;
                Ok(LoginMsg::Status(msg))
            }
            MsgClass::Close => {
                let mut msg = LoginClose::new();
                msg.decode(raw)?;
                Ok(LoginMsg::Close(msg))
            }
            MsgClass::Generic => {
                let is_conn_status = raw
                    .key
                    .as_ref()
                    .and_then(|k| k.name)
                    .map(|n| n == CONS_CONN_STATUS_NAME)
                    .unwrap_or(false);
                if is_conn_status {
                    let mut msg = LoginConsumerConnectionStatus::new();
                    msg.decode(raw)?;
                    Ok(LoginMsg::ConsumerConnectionStatus(msg))
                } else {
                    let mut msg = LoginRtt::new();
                    msg.decode(raw)?;
                    Ok(LoginMsg::Rtt(msg))
                }
            }
            other => Err(CodecError::UnexpectedMsgClass {
                expected: MsgClass::Request,
                got: other,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{DataState, StreamState};

    fn encode_to_vec<F: FnOnce(&mut EncodeCursor<'_>) -> CodecResult<()>>(f: F) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 2048, 14, 1);
        f(&mut enc).unwrap();
        buf
    }

    fn sample_request() -> LoginRequest {
        let mut req = LoginRequest::new();
        req.user_name.set_str("perfuser");
        req.user_name_type = Some(UserNameType::Name);
        req.role = Some(0);
        req.attrib.application_id.set_str("256");
        req.attrib.application_name.set_str("provperf");
        req.attrib.position.set_str("10.0.0.4/net");
        req.attrib.single_open = Some(1);
        req.attrib.support_rtt_monitoring = Some(2);
        req
    }

    #[test]
    fn request_round_trip_preserves_present_fields() {
        let req = sample_request();
        let buf = encode_to_vec(|enc| req.encode(enc));
        let raw = RawMsg::decode(&buf).unwrap();
        let mut decoded = LoginRequest::new();
        decoded.decode(&raw).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn request_decode_rejects_wrong_class() {
        let close = LoginClose::new();
        let buf = encode_to_vec(|enc| close.encode(enc));
        let raw = RawMsg::decode(&buf).unwrap();
        let mut req = LoginRequest::new();
        assert!(matches!(
            req.decode(&raw).unwrap_err(),
            CodecError::UnexpectedMsgClass { .. }
        ));
    }

    #[test]
    fn attrib_clear_resets_presence_and_defaults() {
        let mut attrib = LoginAttrib::default();
        attrib.single_open = Some(0);
        attrib.allow_suspect_data = Some(0);
        attrib.position.set_str("somewhere");
        attrib.clear();
        assert!(attrib.is_empty());
        assert!(attrib.single_open.is_none());
        assert_eq!(attrib.single_open_or_default(), 1);
        assert_eq!(attrib.allow_suspect_data_or_default(), 1);
    }

    #[test]
    fn refresh_round_trip_with_connection_config() {
        let mut refresh = LoginRefresh::new();
        refresh.user_name.set_str("perfuser");
        refresh.user_name_type = Some(UserNameType::Name);
        refresh.solicited = true;
        refresh.seq_num = Some(1);
        refresh.state.stream_state = StreamState::Open;
        refresh.state.data_state = DataState::Ok;
        refresh.state.text.set_str("Login accepted");
        refresh.attrib.application_id.set_str("256");
        refresh.attrib.single_open = Some(1);
        refresh.features.support_post = Some(1);
        refresh.features.support_batch = Some(batch_support::REQUESTS | batch_support::CLOSES);
        refresh.connection_config = Some(LoginConnectionConfig {
            num_standby_servers: 1,
            servers: vec![
                ServerInfo {
                    host: BufferValue::from_bytes(b"feed-a.example.com"),
                    port: 14002,
                    load_factor: 10,
                    server_type: ServerType::Active,
                },
                ServerInfo {
                    host: BufferValue::from_bytes(b"feed-b.example.com"),
                    port: 14002,
                    load_factor: 65535,
                    server_type: ServerType::Standby,
                },
            ],
        });

        let buf = encode_to_vec(|enc| refresh.encode(enc));
        let raw = RawMsg::decode(&buf).unwrap();
        let mut decoded = LoginRefresh::new();
        decoded.decode(&raw).unwrap();
        assert_eq!(decoded, refresh);
    }

    #[test]
    fn copy_survives_source_clear() {
        let mut refresh = LoginRefresh::new();
        refresh.user_name.set_str("perfuser");
        refresh.attrib.position.set_str("10.0.0.4");
        refresh.features.support_standby = Some(1);
        refresh.connection_config = Some(LoginConnectionConfig {
            num_standby_servers: 0,
            servers: vec![ServerInfo {
                host: BufferValue::from_bytes(b"feed-a"),
                port: 14002,
                load_factor: 1,
                server_type: ServerType::Active,
            }],
        });

        let mut cached = LoginRefresh::new();
        refresh.copy_into(&mut cached);
        refresh.clear();

        assert_eq!(cached.user_name.as_bytes(), b"perfuser");
        assert_eq!(cached.attrib.position.as_bytes(), b"10.0.0.4");
        assert_eq!(cached.features.support_standby, Some(1));
        assert_eq!(
            cached.connection_config.as_ref().unwrap().servers[0]
                .host
                .as_bytes(),
            b"feed-a"
        );
    }

    #[test]
    fn status_round_trip_with_state() {
        let mut status = LoginStatus::new();
        status.user_name.set_str("perfuser");
        let mut state = State::default();
        state.stream_state = StreamState::ClosedRecover;
        state.data_state = DataState::Suspect;
        state.text.set_str("Login denied");
        status.state = Some(state);

        let buf = encode_to_vec(|enc| status.encode(enc));
        let raw = RawMsg::decode(&buf).unwrap();
        let mut decoded = LoginStatus::new();
        decoded.decode(&raw).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn rtt_round_trip_and_provider_driven_flag() {
        let mut rtt = LoginRtt::new();
        rtt.provider_driven = true;
        rtt.update_rtt_actual_ticks();
        rtt.tcp_retrans = Some(3);

        let buf = encode_to_vec(|enc| rtt.encode(enc));
        let raw = RawMsg::decode(&buf).unwrap();
        let mut decoded = LoginRtt::new();
        decoded.decode(&raw).unwrap();
        assert_eq!(decoded, rtt);
        assert!(decoded.provider_driven);
    }

    #[test]
    fn rtt_without_ticks_is_rejected() {
        // A keyless generic with an empty element list: no Ticks element.
        let buf = encode_to_vec(|enc| {
            let mut spec = HeaderSpec::new(MsgClass::Generic, DomainType::Login, 1);
            spec.container_type = Some(DataType::ElementList);
            encode_header(enc, &spec)?;
            let list = ElementListEncoder::init(enc)?;
            list.complete(enc)
        });
        let raw = RawMsg::decode(&buf).unwrap();
        let mut rtt = LoginRtt::new();
        assert!(matches!(
            rtt.decode(&raw).unwrap_err(),
            CodecError::Missing { .. }
        ));
    }

    #[test]
    fn rtt_latency_micro_conversion() {
        // The microsecond read-out multiplies the nanosecond delta by 1000.
        // This pins the deployed conversion so a silent "fix" shows up here.
        let mut rtt = LoginRtt::new();
        rtt.update_rtt_actual_ticks();
        let nanos = {
            let mut probe = rtt.clone();
            probe.calculate_rtt_latency(TimeUnit::Nanoseconds)
        };
        let micros = rtt.calculate_rtt_latency(TimeUnit::Microseconds);
        assert!(micros >= nanos.saturating_mul(1000));
        assert_eq!(rtt.rt_latency, Some(micros));
    }

    #[test]
    fn login_msg_dispatch_distinguishes_generics() {
        let mut ccs = LoginConsumerConnectionStatus::new();
        ccs.warm_standby_mode = Some(1);
        let buf = encode_to_vec(|enc| ccs.encode(enc));
        let raw = RawMsg::decode(&buf).unwrap();
        assert!(matches!(
            LoginMsg::decode(&raw).unwrap(),
            LoginMsg::ConsumerConnectionStatus(_)
        ));

        let mut rtt = LoginRtt::new();
        rtt.update_rtt_actual_ticks();
        let buf = encode_to_vec(|enc| rtt.encode(enc));
        let raw = RawMsg::decode(&buf).unwrap();
        assert!(matches!(LoginMsg::decode(&raw).unwrap(), LoginMsg::Rtt(_)));
    }

    #[test]
    fn unknown_attrib_elements_are_skipped() {
        // Hand-build a request whose attrib list carries an element this
        // decoder release does not know.
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 512, 14, 1);
        let mut spec = HeaderSpec::new(MsgClass::Request, DomainType::Login, 1);
        spec.key_name = Some(b"perfuser");
        spec.key_attrib_follows = true;
        encode_header(&mut enc, &spec).unwrap();
        let mut list = ElementListEncoder::init(&mut enc).unwrap();
        list.add_uint(&mut enc, b"ElementFromTheFuture", 42).unwrap();
        list.add_uint(&mut enc, names::SINGLE_OPEN, 0).unwrap();
        list.complete(&mut enc).unwrap();

        let raw = RawMsg::decode(&buf).unwrap();
        let mut req = LoginRequest::new();
        req.decode(&raw).unwrap();
        assert_eq!(req.attrib.single_open, Some(0));
    }

    #[test]
    fn known_attrib_element_with_wrong_type_fails() {
        let mut buf = Vec::new();
        let mut enc = EncodeCursor::new(&mut buf, 512, 14, 1);
        let mut spec = HeaderSpec::new(MsgClass::Request, DomainType::Login, 1);
        spec.key_name = Some(b"perfuser");
        spec.key_attrib_follows = true;
        encode_header(&mut enc, &spec).unwrap();
        let mut list = ElementListEncoder::init(&mut enc).unwrap();
        // SingleOpen must be a uint; ascii here is malformed.
        list.add_ascii(&mut enc, names::SINGLE_OPEN, b"yes").unwrap();
        list.complete(&mut enc).unwrap();

        let raw = RawMsg::decode(&buf).unwrap();
        let mut req = LoginRequest::new();
        assert!(matches!(
            req.decode(&raw).unwrap_err(),
            CodecError::WrongElementType { .. }
        ));
    }
}
