//! # Feedbench Transport Boundary
//!
//! ## Purpose
//!
//! The narrow seam between the codec and whatever moves bytes: acquire a
//! bounded buffer, encode into it, write it (retrying around flush when the
//! transport pushes back), optionally packing several messages into one
//! buffer first.
//!
//! The only shipped implementation is the in-process loopback channel used
//! by the harnesses and tests; a socket transport would implement the same
//! `Channel` trait.

pub mod channel;
pub mod error;
pub mod loopback;

pub use channel::{Channel, TransportBuffer, WriteOutcome, WritePriority};
pub use error::TransportError;
pub use loopback::{loopback_pair, LoopbackChannel, LoopbackOptions};
