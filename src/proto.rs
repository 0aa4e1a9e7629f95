//! Protocol-level enumerations: query types, response types, term types, error codes, and the
//! handshake magic numbers. This is the wire vocabulary; nothing here has behavior beyond
//! conversion to and from the integers the server actually sends.

use serde::{Deserialize, Serialize};

/// Handshake magic numbers the client may encounter. Only [`HandshakeVersion::V1_0`] is
/// implemented; the others are kept so a version mismatch can be reported by name rather than
/// by raw integer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum HandshakeVersion {
    V1_0 = 0x34c2_bdc3,
    V0_4 = 0x400c_2d20,
    V0_3 = 0x5f75_e83e,
    V0_2 = 0x7230_81e1,
    V0_1 = 0x3f61_ba36,
}

impl HandshakeVersion {
    pub const IMPLEMENTED: HandshakeVersion = HandshakeVersion::V1_0;

    pub fn as_le_bytes(self) -> [u8; 4] {
        (self as u32).to_le_bytes()
    }
}

/// The envelope kinds a client can send.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum QueryType {
    Start = 1,
    Continue = 2,
    Stop = 3,
    NoreplyWait = 4,
    ServerInfo = 5,
}

impl QueryType {
    pub fn as_i64(self) -> i64 {
        self as u8 as i64
    }
}

/// The response kinds a server can send back. `IsError` holds for any value `>= 16`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ResponseType {
    Atom = 1,
    Sequence = 2,
    Partial = 3,
    WaitComplete = 4,
    ServerInfo = 5,
    ClientError = 16,
    CompileError = 17,
    RuntimeError = 18,
}

impl ResponseType {
    pub fn from_i64(value: i64) -> Option<Self> {
        Some(match value {
            1 => Self::Atom,
            2 => Self::Sequence,
            3 => Self::Partial,
            4 => Self::WaitComplete,
            5 => Self::ServerInfo,
            16 => Self::ClientError,
            17 => Self::CompileError,
            18 => Self::RuntimeError,
            _ => return None,
        })
    }

    /// `IsError` holds for response types `>= 16`.
    pub fn is_error(self) -> bool {
        (self as u8) >= 16
    }
}

/// Server-reported error codes. The numeric ranges are meaningful to the
/// server; the client only needs to distinguish the handful listed here.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i64)]
pub enum ErrorCode {
    Internal = 1_000_000,
    ResourceLimit = 2_000_000,
    QueryLogic = 3_000_000,
    NonExistence = 3_100_000,
    OpFailed = 4_100_000,
    OpIndeterminate = 4_200_000,
    User = 5_000_000,
    Permission = 6_000_000,
    /// Present so malformed or unrecognized server codes can still round-trip rather than being
    /// silently coerced to `Internal`.
    Unknown = 0,
}

impl ErrorCode {
    pub fn from_i64(value: i64) -> Self {
        match value {
            1_000_000 => Self::Internal,
            2_000_000 => Self::ResourceLimit,
            3_000_000 => Self::QueryLogic,
            3_100_000 => Self::NonExistence,
            4_100_000 => Self::OpFailed,
            4_200_000 => Self::OpIndeterminate,
            5_000_000 => Self::User,
            6_000_000 => Self::Permission,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Response note flags (the `n` array on a response). Represented as bitflags so
/// `Response::is_feed` is a single cheap check rather than a linear scan repeated by both the
/// executor and the cursor constructor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResponseNotes(u32);

bitflags::bitflags! {
    impl ResponseNotes: u32 {
        /// `1`: this stream is a changefeed over a sequence of values.
        const SEQUENCE_FEED = 0b0001;
        /// `2`: this stream is a changefeed over a single atom value.
        const ATOM_FEED = 0b0010;
        /// `3`: this stream is an order-by-limit changefeed.
        const ORDER_BY_LIMIT_FEED = 0b0100;
        /// `4`: this stream is an unioned changefeed.
        const UNIONED_FEED = 0b1000;
    }
}

impl ResponseNotes {
    pub fn from_codes(codes: &[i64]) -> Self {
        let mut notes = ResponseNotes::empty();
        for &code in codes {
            notes |= match code {
                1 => ResponseNotes::SEQUENCE_FEED,
                2 => ResponseNotes::ATOM_FEED,
                3 => ResponseNotes::ORDER_BY_LIMIT_FEED,
                4 => ResponseNotes::UNIONED_FEED,
                _ => ResponseNotes::empty(),
            };
        }
        notes
    }

    /// Whether any of the feed-note bits are set, i.e. the stream is a changefeed rather than a
    /// plain partial result set.
    pub fn is_feed(self) -> bool {
        self.intersects(
            ResponseNotes::SEQUENCE_FEED
                | ResponseNotes::ATOM_FEED
                | ResponseNotes::ORDER_BY_LIMIT_FEED
                | ResponseNotes::UNIONED_FEED,
        )
    }
}

/// The fixed catalog a term's `type` tag is drawn from: an integer from a catalog of roughly 180
/// values. This crate only needs to name the handful that the query envelope builder and the
/// convenience constructors reference directly; any other term type is represented by its raw
/// `i64` (see [`crate::term::Term::op`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(i64)]
pub enum TermType {
    Db = 14,
    Table = 15,
    Get = 16,
    Filter = 39,
    Insert = 56,
    MakeArray = 2,
}

impl TermType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}
