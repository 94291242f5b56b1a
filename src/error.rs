//! Error types for HTTP/2 tunnels

use std::fmt;
use std::io;

use http::{Method, StatusCode};

/// Result type alias for tunnel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tunnel error types
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying transport
    Io(io::Error),
    /// HTTP/2 protocol error from the `h2` layer
    Http2(h2::Error),
    /// Remote endpoint refused, unreachable, or failed the transport handshake
    Dial {
        /// The `host:port` that was dialed
        target: String,
        /// What went wrong
        reason: String,
    },
    /// Remote endpoint answered the initiation request with a non-2xx status
    DialRejected {
        /// Status returned by the remote listener
        status: StatusCode,
        /// Response body, if the remote sent a short explanation
        reason: Option<String>,
    },
    /// Handshake token could not be read before the stream failed
    Handshake(io::Error),
    /// Handshake bytes arrived but did not match the expected token
    HandshakeMismatch,
    /// `accept()` called on a closed listener
    ListenerClosed,
    /// Incoming request used a verb other than the initiation verb
    InvalidMethod(Method),
    /// Dial target could not be turned into a request URI
    InvalidTarget(&'static str),
    /// TLS configuration or handshake failure
    #[cfg(feature = "tls")]
    Tls(String),
}

impl Error {
    /// Returns true for errors produced while establishing an outgoing tunnel
    pub fn is_dial(&self) -> bool {
        matches!(self, Error::Dial { .. } | Error::DialRejected { .. })
    }

    /// Returns true for errors produced while consuming the handshake token
    pub fn is_handshake(&self) -> bool {
        matches!(self, Error::Handshake(_) | Error::HandshakeMismatch)
    }

    pub(crate) fn dial(target: &str, reason: impl fmt::Display) -> Self {
        Error::Dial {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Http2(e) => write!(f, "HTTP/2 error: {}", e),
            Error::Dial { target, reason } => write!(f, "failed to dial {}: {}", target, reason),
            Error::DialRejected { status, reason } => {
                if let Some(r) = reason {
                    write!(f, "tunnel rejected with {}: {}", status, r)
                } else {
                    write!(f, "tunnel rejected with {}", status)
                }
            }
            Error::Handshake(e) => write!(f, "failed to handshake: {}", e),
            Error::HandshakeMismatch => write!(f, "failed to handshake: unexpected token"),
            Error::ListenerClosed => write!(f, "listener closed"),
            Error::InvalidMethod(m) => write!(f, "invalid initiation method: {}", m),
            Error::InvalidTarget(msg) => write!(f, "invalid dial target: {}", msg),
            #[cfg(feature = "tls")]
            Error::Tls(msg) => write!(f, "TLS error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::Handshake(e) => Some(e),
            Error::Http2(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<h2::Error> for Error {
    fn from(e: h2::Error) -> Self {
        if e.is_io() {
            match e.into_io() {
                Some(io) => Error::Io(io),
                None => Error::Io(io::Error::other("HTTP/2 I/O error")),
            }
        } else {
            Error::Http2(e)
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::Handshake(e) => io::Error::new(e.kind(), Error::Handshake(e)),
            Error::ListenerClosed => io::Error::new(io::ErrorKind::NotConnected, "listener closed"),
            Error::Dial { .. } => io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()),
            other => io::Error::other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_classification() {
        let err = Error::dial("localhost:1", "connection refused");
        assert!(err.is_dial());
        assert!(!err.is_handshake());
        assert_eq!(err.to_string(), "failed to dial localhost:1: connection refused");

        let err = Error::DialRejected {
            status: StatusCode::BAD_REQUEST,
            reason: Some("MAGIC required. Not GET".into()),
        };
        assert!(err.is_dial());
        assert!(err.to_string().contains("MAGIC required"));
    }

    #[test]
    fn test_handshake_error_keeps_source() {
        let err = Error::Handshake(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(err.is_handshake());
        assert!(std::error::Error::source(&err).is_some());

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_listener_closed_to_io() {
        let io_err: io::Error = Error::ListenerClosed.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotConnected);
    }
}
