//! Wire primitive value types.
//!
//! `BufferValue` is the owned byte-string used for every string/opaque field
//! in the message model. Messages are pooled and reused across many wire
//! messages, so `clear()` must keep the backing allocation and `copy_into`
//! must produce storage independent of the source.

use crate::domain::{DataState, StateCode, StreamState};
use std::fmt;

/// Owned byte-string field.
///
/// Cleared buffers retain capacity; copies never share storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BufferValue {
    data: Vec<u8>,
}

impl BufferValue {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
        }
    }

    /// Reset to empty without releasing the backing allocation.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Replace contents with a copy of `bytes`.
    pub fn set(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    pub fn set_str(&mut self, s: &str) {
        self.set(s.as_bytes());
    }

    /// Deep copy into `dest`; `dest` never aliases `self` afterwards.
    pub fn copy_into(&self, dest: &mut BufferValue) {
        dest.set(&self.data);
    }
}

impl From<&str> for BufferValue {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl fmt::Display for BufferValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

/// Stream/data state carried on refresh and status messages.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub stream_state: StreamState,
    pub data_state: DataState,
    pub code: StateCode,
    pub text: BufferValue,
}

impl Default for State {
    fn default() -> Self {
        Self {
            stream_state: StreamState::Open,
            data_state: DataState::Ok,
            code: StateCode::None,
            text: BufferValue::new(),
        }
    }
}

impl State {
    /// Reset to the open/ok default.
    pub fn clear(&mut self) {
        self.stream_state = StreamState::Open;
        self.data_state = DataState::Ok;
        self.code = StateCode::None;
        self.text.clear();
    }

    pub fn copy_into(&self, dest: &mut State) {
        dest.stream_state = self.stream_state;
        dest.data_state = self.data_state;
        dest.code = self.code;
        self.text.copy_into(&mut dest.text);
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "State: {:?}/{:?}/{:?} - text: \"{}\"",
            self.stream_state, self.data_state, self.code, self.text
        )
    }
}

/// Quality of service advertised by a service and echoed on item requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Qos {
    pub timeliness: u8,
    pub rate: u8,
    pub dynamic: bool,
}

impl Qos {
    pub const TIMELINESS_REALTIME: u8 = 1;
    pub const RATE_TICK_BY_TICK: u8 = 1;

    pub fn realtime() -> Self {
        Self {
            timeliness: Self::TIMELINESS_REALTIME,
            rate: Self::RATE_TICK_BY_TICK,
            dynamic: false,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Identity attributes of a message: name, name type, service.
///
/// Together with the domain type this forms the composite key a provider
/// session uses to index open items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MsgKey {
    pub name: BufferValue,
    pub name_type: Option<u8>,
    pub service_id: Option<u16>,
}

impl MsgKey {
    pub fn clear(&mut self) {
        self.name.clear();
        self.name_type = None;
        self.service_id = None;
    }

    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn copy_into(&self, dest: &mut MsgKey) {
        self.name.copy_into(&mut dest.name);
        dest.name_type = self.name_type;
        dest.service_id = self.service_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_clear_retains_capacity() {
        let mut buf = BufferValue::from_bytes(b"ApplicationId");
        let cap = buf.as_bytes().len();
        buf.clear();
        assert!(buf.is_empty());
        // Vec keeps its allocation after clear; the next set of the same
        // size must not grow.
        buf.set(&vec![0u8; cap]);
        assert_eq!(buf.len(), cap);
    }

    #[test]
    fn buffer_copy_is_independent_of_source() {
        let mut src = BufferValue::from_bytes(b"TR-Position-1");
        let mut dst = BufferValue::new();
        src.copy_into(&mut dst);
        src.clear();
        assert_eq!(dst.as_bytes(), b"TR-Position-1");
    }

    #[test]
    fn state_clear_restores_open_ok() {
        let mut state = State {
            stream_state: StreamState::Closed,
            data_state: DataState::Suspect,
            code: StateCode::NotFound,
            text: BufferValue::from_bytes(b"gone"),
        };
        state.clear();
        assert_eq!(state.stream_state, StreamState::Open);
        assert_eq!(state.data_state, DataState::Ok);
        assert_eq!(state.code, StateCode::None);
        assert!(state.text.is_empty());
    }
}
