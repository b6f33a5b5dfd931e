//! # Feedbench Domain Types
//!
//! ## Purpose
//!
//! Pure data definitions shared by every other crate in the workspace:
//! message-class and domain tags, wire primitive value types, stream state,
//! and the table of well-known element names.
//!
//! ## What This Crate Does NOT Contain
//! - Encoding/decoding rules (belongs in `codec`)
//! - Transport or buffer management (belongs in `transport`)

pub mod domain;
pub mod element;
pub mod primitives;

pub use domain::{
    DataState, DataType, DomainType, MsgClass, RoleType, ServerType, StateCode, StreamState,
    UserNameType,
};
pub use element::names;
pub use primitives::{BufferValue, MsgKey, Qos, State};

/// Wire protocol version advertised in encode cursors.
pub const PROTOCOL_MAJOR_VERSION: u8 = 14;
pub const PROTOCOL_MINOR_VERSION: u8 = 1;
