//! Contains the `Error` and `Result` types used throughout the crate.

use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::proto::ErrorCode;

/// The result type for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while driving a connection, a cursor, or a query.
///
/// The inner [`ErrorKind`] is wrapped so that `Error` stays small and, where the source is
/// itself cheap to clone, clonable: cursors keep the same error around for every subsequent
/// `Next` call once one has occurred (see [`crate::cursor`]).
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    pub kind: Box<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    pub(crate) fn frame_too_large(len: u32) -> Self {
        Self::new(ErrorKind::FrameTooLarge { len })
    }

    pub(crate) fn handshake(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handshake {
            message: message.into(),
        })
    }

    pub(crate) fn handshake_protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandshakeProtocol {
            message: message.into(),
        })
    }

    pub(crate) fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReqlAuth {
            message: message.into(),
        })
    }

    pub(crate) fn conn_closed() -> Self {
        Self::new(ErrorKind::ConnClosed)
    }

    pub(crate) fn unexpected_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnexpectedResponse {
            message: message.into(),
        })
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported {
            message: message.into(),
        })
    }

    pub(crate) fn canceled() -> Self {
        Self::new(ErrorKind::Canceled)
    }

    pub(crate) fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded)
    }

    /// Whether this error represents a cooperative cancellation (as opposed to a deadline, a
    /// transport failure, or a server-reported error).
    pub fn is_canceled(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Canceled)
    }

    /// Whether this error represents a deadline that elapsed before the operation completed.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::DeadlineExceeded)
    }

    /// Whether this error is fatal to the connection that produced it (as opposed to being
    /// scoped to the single query that triggered it).
    pub fn is_transport_fatal(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Io(_)
                | ErrorKind::ConnClosed
                | ErrorKind::Handshake { .. }
                | ErrorKind::HandshakeProtocol { .. }
                | ErrorKind::ReqlAuth { .. }
                | ErrorKind::FrameTooLarge { .. }
                | ErrorKind::MalformedFrame { .. }
        )
    }

    /// The server-reported error kind, if this error originated as a server response.
    pub fn server_error_code(&self) -> Option<ErrorCode> {
        match self.kind.as_ref() {
            ErrorKind::Server(server) => Some(server.code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io(Arc::new(err)))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Json(Arc::new(err)))
    }
}

/// The taxonomy of errors this crate can produce, grouped by origin as described in the client
/// runtime's error-handling design: transport errors are fatal to the connection, server errors
/// are fatal only to the query that produced them, and protocol errors indicate a bug on one
/// side of the wire.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Underlying I/O failure reading from or writing to the socket.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// A JSON payload failed to parse or serialize.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// A single frame's payload exceeded the 64 MiB cap.
    #[error("frame of {len} bytes exceeds the 64 MiB limit")]
    FrameTooLarge { len: u32 },

    /// A frame's header or payload could not be interpreted as a valid frame.
    #[error("malformed frame: {message}")]
    MalformedFrame { message: String },

    /// The connection was closed (explicitly, or because the reader loop exited).
    #[error("connection is closed")]
    ConnClosed,

    /// The handshake failed for a reason unrelated to authentication (bad magic response,
    /// unexpected JSON shape, server reported `success: false` without an auth-domain error).
    #[error("handshake failed: {message}")]
    Handshake { message: String },

    /// A SCRAM message from the server was malformed or violated the protocol (bad nonce,
    /// iteration count below the safety floor, unparseable key-value pairs).
    #[error("handshake protocol error: {message}")]
    HandshakeProtocol { message: String },

    /// The server rejected the supplied credentials.
    #[error("authentication failed: {message}")]
    ReqlAuth { message: String },

    /// The server returned a response whose type did not fit the context it arrived in (e.g. a
    /// sequence response transitioning out of a changefeed, or a non-error response to
    /// `SERVER_INFO`).
    #[error("unexpected response: {message}")]
    UnexpectedResponse { message: String },

    /// A query envelope was requested for a query type the builder does not support.
    #[error("unsupported query type: {message}")]
    Unsupported { message: String },

    /// A server-reported error response (`ClientError`, `CompileError`, `RuntimeError`, and the
    /// `RuntimeError` refinements for nonexistence/permission failures).
    #[error("{0}")]
    Server(ServerError),

    /// The caller's context was canceled before the operation completed.
    #[error("operation canceled")]
    Canceled,

    /// The caller's context deadline elapsed before the operation completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Used internally to carry an arbitrary payload through [`crate::context::Context`]
    /// cancellation plumbing in tests.
    #[cfg(test)]
    #[error("custom: {0}")]
    Custom(String),
}

/// A server-reported error response: carries the response type that produced it, the
/// protocol-level [`ErrorCode`] when one was present, the server's message, and any backtrace
/// frames.
#[derive(Clone, Debug)]
pub struct ServerError {
    pub kind: ServerErrorKind,
    pub code: ErrorCode,
    pub message: String,
    pub backtrace: Vec<serde_json::Value>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Which of the server-reported variants this error represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerErrorKind {
    /// Response type 16: malformed query from the client.
    ClientError,
    /// Response type 17: the term tree failed to compile.
    CompileError,
    /// Response type 18 with no more specific error code.
    RuntimeError,
    /// Response type 18, error code 3100000: the target of the query does not exist.
    NonExistenceError,
    /// Response type 18, error code 6000000: the credential lacks permission.
    PermissionError,
}
