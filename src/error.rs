//! Error types at the crate's boundaries.
//!
//! Registration errors surface synchronously from `register`; codec errors
//! classify read failures so the dispatcher can tell a dead connection from
//! a recoverable decode problem; handler errors travel to the client as the
//! response header's error string. No error crosses a task boundary as a
//! panic.

use std::fmt;
use std::io;

/// Error returned by `Server::register` and `Server::register_name`.
///
/// Fatal to that registration only; the server remains usable.
#[derive(Debug)]
pub enum RegisterError {
    /// A service is already registered under this name.
    DuplicateService(String),
    /// `register_name` was called with an empty name.
    EmptyServiceName,
    /// The receiver's type name does not start with an uppercase letter.
    /// Use `register_name` to register it under an explicit name.
    UnexportedServiceName(String),
    /// The receiver declared no acceptable methods.
    NoMethods(String),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::DuplicateService(name) => {
                write!(f, "service already defined: {name}")
            }
            RegisterError::EmptyServiceName => write!(f, "service name cannot be empty"),
            RegisterError::UnexportedServiceName(name) => {
                write!(f, "service type {name} is not exported")
            }
            RegisterError::NoMethods(name) => {
                write!(f, "service {name} has no methods of suitable shape")
            }
        }
    }
}

impl std::error::Error for RegisterError {}

/// Error from a codec read operation.
///
/// `Eof` and `Io` end the connection; `Decode` is recoverable and the
/// dispatcher keeps reading.
#[derive(Debug)]
pub enum CodecError {
    /// The peer closed the connection.
    Eof,
    /// The underlying stream failed.
    Io(io::Error),
    /// The frame arrived but its contents could not be decoded.
    Decode(String),
}

impl CodecError {
    /// Classify an I/O error from a read: an unexpected EOF means the peer
    /// went away, anything else is a transport failure.
    pub fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Eof
        } else {
            CodecError::Io(err)
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Eof => write!(f, "connection closed"),
            CodecError::Io(e) => write!(f, "read failed: {e}"),
            CodecError::Decode(e) => write!(f, "cannot decode frame: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Error reported by a handler, carried verbatim in the response header.
///
/// Any value convertible to a human-readable string works:
///
/// ```
/// # use wander::HandlerError;
/// fn divide(a: i64, b: i64) -> Result<i64, HandlerError> {
///     if b == 0 {
///         return Err(HandlerError::from("divide by zero"));
///     }
///     Ok(a / b)
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(String);

impl HandlerError {
    /// Build a handler error from anything displayable.
    pub fn new(msg: impl fmt::Display) -> Self {
        HandlerError(msg.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError(msg.to_string())
    }
}

impl From<io::Error> for HandlerError {
    fn from(err: io::Error) -> Self {
        HandlerError(err.to_string())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HandlerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_read_classifies_eof() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(CodecError::from_read(eof), CodecError::Eof));

        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(CodecError::from_read(broken), CodecError::Io(_)));
    }

    #[test]
    fn handler_error_display_is_verbatim() {
        assert_eq!(HandlerError::from("divide by zero").to_string(), "divide by zero");
        assert_eq!(HandlerError::new(42).to_string(), "42");
    }
}
