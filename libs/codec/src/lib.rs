//! # Feedbench Protocol Codec
//!
//! ## Purpose
//!
//! The "rules" layer of the workspace: how typed messages become bytes and
//! back. Contains the encode/decode cursors, the container codecs (element
//! list, field list, server list) and the RDM message families layered on
//! top of them (Login, Directory, Dictionary).
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → transport/
//!     ↑           ↓          ↓
//! Pure Data   Wire Rules  Buffers,
//! Structures  Encoding    Channels
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Buffer pooling or channel management (belongs in `transport`)
//! - Scheduling, statistics, or item bookkeeping (belongs in `perf`)
//!
//! Every fallible operation returns `Result<_, CodecError>`; protocol
//! failures are values, never panics. A failed encode leaves the buffer in
//! an unusable intermediate state - callers discard it and retry with a
//! fresh one.

pub mod cursor;
pub mod element_list;
pub mod error;
pub mod field_list;
pub mod msg;
pub mod rdm;

pub use cursor::{ContainerMark, DecodeCursor, EncodeCursor};
pub use element_list::{ElementEntry, ElementListDecoder, ElementListEncoder};
pub use error::{CodecError, CodecResult};
pub use field_list::{FieldEntry, FieldListDecoder, FieldListEncoder, FieldValue};
pub use msg::{MsgFlags, RawMsg};
