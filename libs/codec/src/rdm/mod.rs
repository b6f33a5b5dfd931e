//! RDM message families layered on the wire codec.
//!
//! Each message type follows the same contract:
//! - `clear()` resets every field and restores the fixed class/domain
//!   identity (a close is always a close on the login domain, never
//!   "unknown").
//! - `encode(cursor)` writes header, key attributes and payload; the first
//!   failing sub-step short-circuits and the buffer must be discarded.
//! - `decode(&raw)` validates the message class, clears, then populates
//!   from the sections the raw message reports present. A known element
//!   name with the wrong declared type is a hard failure; unknown names are
//!   skipped.
//! - `copy_into(dest)` deep-copies every present field so `dest` survives
//!   the source being cleared and reused.

pub mod dictionary;
pub mod directory;
pub mod login;
