//! The FastCGI record model
//!
//! FastCGI frames everything as typed, length-prefixed records. This module
//! holds the record types this server understands plus the protocol
//! constants; `parser` decodes inbound records, `serializer` frames outbound
//! ones, and `driver` runs the transport.

pub mod driver;
pub mod parser;
pub mod serializer;

/// A single decoded protocol record.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Record {
    /// Protocol version from the header. Always 1 after a successful parse.
    pub version: u8,
    pub request_id: u16,
    pub content: Content,
}

impl Record {
    /// Returns the wire type code of this record
    #[inline]
    pub fn kind(&self) -> u8 {
        self.content.kind()
    }
}

/// The type-specific body of a record.
///
/// Only the five record types a responder can meet on the wire are
/// represented; anything else fails in the parser with `InvalidType`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Content {
    BeginRequest(BeginRequest),
    EndRequest(EndRequest),
    Params(Params),
    Stdin(Vec<u8>),
    Stdout(Vec<u8>),
}

impl Content {
    pub fn kind(&self) -> u8 {
        match *self {
            Content::BeginRequest(_) => record_kind::BEGIN_REQUEST,
            Content::EndRequest(_) => record_kind::END_REQUEST,
            Content::Params(_) => record_kind::PARAMS,
            Content::Stdin(_) => record_kind::STDIN,
            Content::Stdout(_) => record_kind::STDOUT,
        }
    }
}

/// The parameters of a Params record, in wire order. Duplicates are allowed
/// at this layer; nothing is deduplicated or reordered.
pub type Params = Vec<Param>;

/// One decoded name/value pair
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Param {
        Param {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct BeginRequest {
    pub role: Role,
    pub flags: u8,
}

impl BeginRequest {
    /// Whether the web server asked us to keep the connection open after
    /// finishing this request
    #[inline]
    pub fn keepalive(&self) -> bool {
        self.flags & flags::KEEP_CONN != 0
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: u8,
}

/// FastCGI application roles. Only `Responder` is supported; the parser
/// rejects BeginRequest records carrying anything else.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Role {
    Responder,
    Authorizer,
    Filter,
}

impl Role {
    /// Returns the protocol's number for this role
    pub fn to_protocol_number(self) -> u16 {
        match self {
            Role::Responder => 1,
            Role::Authorizer => 2,
            Role::Filter => 3,
        }
    }
}

/// The single protocol version this implementation speaks
pub const PROTOCOL_VERSION: u8 = 1;

pub mod flags {
    pub const KEEP_CONN: u8 = 1;
}

pub mod record_kind {
    pub const BEGIN_REQUEST: u8 = 1;
    pub const END_REQUEST: u8 = 3;
    pub const PARAMS: u8 = 4;
    pub const STDIN: u8 = 5;
    pub const STDOUT: u8 = 6;
}

pub mod protocol_status {
    pub const REQUEST_COMPLETE: u8 = 0;
    pub const CANT_MPX_CONN: u8 = 1;
    pub const OVERLOADED: u8 = 2;
    pub const UNKNOWN_ROLE: u8 = 3;
}
