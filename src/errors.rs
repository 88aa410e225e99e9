//! Error handling for the server library

use crate::fastcgi::parser::ParseError;

use std::io;

/// A Result for internal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors which might arise within the library
#[derive(Debug)]
pub enum Error {
    /// The HTTP request line or headers were malformed
    Parse(httparse::Error),
    Io(io::Error),
    /// A FastCGI record failed to decode
    Record(ParseError),
    /// An outgoing FastCGI record could not be framed
    Serialization(SerializationError),
    /// The peer sent records a responder should never see, or sent them
    /// out of order
    FastCgiProtocolViolation,
    RequestLineTooLong,
    PathNotInOriginForm,
    IllegalPercentEncoding,
    PermissionDenied,
    /// The stream ended before a complete request arrived
    RequestIncomplete,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SerializationError {
    /// Content or a name/value length doesn't fit its wire-format field
    TooLong,
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Error {
        Error::Parse(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Error {
        Error::Record(e)
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Error {
        Error::Serialization(e)
    }
}
