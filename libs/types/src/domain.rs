//! Message-class and domain tags.
//!
//! Every wire message carries a `MsgClass` (what kind of message) and a
//! `DomainType` (which message family). Both are single-byte tags on the
//! wire; `num_enum` gives the checked conversions back from raw bytes.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Wire-level message kind.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
pub enum MsgClass {
    Request = 1,
    Refresh = 2,
    Status = 3,
    Update = 4,
    Close = 5,
    Generic = 7,
    Post = 8,
}

/// Message family a wire message belongs to.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
pub enum DomainType {
    Login = 1,
    Directory = 4,
    Dictionary = 5,
    MarketPrice = 6,
}

/// Declared type of a container entry value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum DataType {
    NoData = 0,
    UInt = 4,
    Int = 3,
    Real = 8,
    AsciiString = 16,
    Buffer = 19,
    State = 23,
    ElementList = 133,
    FieldList = 132,
    ServerList = 136,
}

/// State of the stream itself.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum StreamState {
    Unspecified = 0,
    Open = 1,
    NonStreaming = 2,
    ClosedRecover = 3,
    Closed = 4,
    Redirected = 5,
}

/// State of the data flowing on a stream.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum DataState {
    NoChange = 0,
    Ok = 1,
    Suspect = 2,
}

/// Additional detail qualifying a `State`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum StateCode {
    None = 0,
    NotFound = 5,
    Timeout = 6,
    NotEntitled = 7,
    UsageError = 11,
    NoResources = 12,
}

/// How a login identifies its user name.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum UserNameType {
    Name = 1,
    EmailAddress = 2,
    Token = 3,
    Cookie = 4,
}

/// Role a login request declares.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum RoleType {
    Consumer = 0,
    Provider = 1,
}

/// Server classification advertised in a login connection config.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum ServerType {
    #[default]
    Active = 0,
    Standby = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_class_round_trips_through_wire_tag() {
        for class in [
            MsgClass::Request,
            MsgClass::Refresh,
            MsgClass::Status,
            MsgClass::Update,
            MsgClass::Close,
            MsgClass::Generic,
            MsgClass::Post,
        ] {
            let tag: u8 = class.into();
            assert_eq!(MsgClass::try_from(tag).unwrap(), class);
        }
    }

    #[test]
    fn unknown_domain_tag_is_rejected() {
        assert!(DomainType::try_from(99u8).is_err());
    }
}
