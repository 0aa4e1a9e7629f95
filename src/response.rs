//! The parsed server response and its mapping onto typed errors.

use serde::Deserialize;

use crate::{
    error::{Error, ErrorKind, Result, ServerError, ServerErrorKind},
    proto::{ErrorCode, ResponseNotes, ResponseType},
};

/// The raw JSON shape of a response envelope, deserialized directly off the wire before being
/// turned into the richer [`Response`].
#[derive(Debug, Deserialize)]
struct RawResponse {
    t: i64,
    #[serde(default)]
    r: Vec<serde_json::Value>,
    #[serde(default)]
    e: Option<i64>,
    #[serde(default)]
    b: Vec<serde_json::Value>,
    #[serde(default)]
    n: Vec<i64>,
    #[serde(default)]
    p: Option<serde_json::Value>,
}

/// A parsed server message: its response type, results, and the optional error/backtrace/notes/
/// profile fields.
#[derive(Clone, Debug)]
pub struct Response {
    pub response_type: ResponseType,
    pub results: Vec<serde_json::Value>,
    pub error_code: Option<ErrorCode>,
    pub backtrace: Vec<serde_json::Value>,
    pub notes: ResponseNotes,
    pub profile: Option<serde_json::Value>,
}

impl Response {
    /// Parses a response payload as received in a wire frame. A `t` field outside the known
    /// response-type catalog, or a payload that isn't valid JSON, is a malformed frame, which is
    /// transport-fatal.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let raw: RawResponse = serde_json::from_slice(payload)?;
        let response_type = ResponseType::from_i64(raw.t).ok_or_else(|| {
            Error::new(ErrorKind::MalformedFrame {
                message: format!("unrecognized response type {}", raw.t),
            })
        })?;
        Ok(Response {
            response_type,
            results: raw.r,
            error_code: raw.e.map(ErrorCode::from_i64),
            backtrace: raw.b,
            notes: ResponseNotes::from_codes(&raw.n),
            profile: raw.p,
        })
    }

    pub fn is_error(&self) -> bool {
        self.response_type.is_error()
    }

    /// Whether this response's notes mark it as a changefeed rather than a plain stream (both the
    /// cursor constructor and the executor need this classification).
    pub fn is_feed(&self) -> bool {
        self.notes.is_feed()
    }

    /// The single message a server error response carries as its lone result, or an empty string
    /// if the server didn't send one.
    fn message(&self) -> String {
        self.results
            .first()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned()
    }

    /// Converts `self` into a typed error using the server-reported error taxonomy. Only
    /// meaningful when [`Response::is_error`] is `true`; callers are expected to check that (or
    /// use [`Response::into_result`]) first.
    pub fn into_error(self) -> Error {
        let message = self.message();
        let code = self.error_code.unwrap_or(ErrorCode::Unknown);
        let kind = match self.response_type {
            ResponseType::ClientError => ServerErrorKind::ClientError,
            ResponseType::CompileError => ServerErrorKind::CompileError,
            ResponseType::RuntimeError => match code {
                ErrorCode::NonExistence => ServerErrorKind::NonExistenceError,
                ErrorCode::Permission => ServerErrorKind::PermissionError,
                _ => ServerErrorKind::RuntimeError,
            },
            _ => ServerErrorKind::RuntimeError,
        };
        Error::new(ErrorKind::Server(ServerError {
            kind,
            code,
            message,
            backtrace: self.backtrace,
        }))
    }

    /// Consumes `self`, returning `Err` if it's an error response and `Ok(self)` otherwise.
    pub fn into_result(self) -> Result<Self> {
        if self.is_error() {
            Err(self.into_error())
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_atom_response() {
        let response = Response::parse(br#"{"t":1,"r":["test"]}"#).unwrap();
        assert_eq!(response.response_type, ResponseType::Atom);
        assert_eq!(response.results, vec![serde_json::json!("test")]);
        assert!(!response.is_error());
    }

    #[test]
    fn classifies_runtime_error_with_nonexistence_code() {
        let response =
            Response::parse(br#"{"t":18,"e":3100000,"r":["no such table"]}"#).unwrap();
        let err = response.into_error();
        match *err.kind {
            ErrorKind::Server(ref server) => {
                assert_eq!(server.kind, ServerErrorKind::NonExistenceError);
                assert_eq!(server.message, "no such table");
            }
            ref other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn classifies_plain_runtime_error_as_runtime_error() {
        let response = Response::parse(br#"{"t":18,"e":3000000,"r":["boom"]}"#).unwrap();
        let err = response.into_error();
        match *err.kind {
            ErrorKind::Server(ref server) => {
                assert_eq!(server.kind, ServerErrorKind::RuntimeError);
            }
            ref other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn detects_changefeed_notes() {
        let response = Response::parse(br#"{"t":3,"r":[1],"n":[1]}"#).unwrap();
        assert!(response.is_feed());

        let response = Response::parse(br#"{"t":3,"r":[1]}"#).unwrap();
        assert!(!response.is_feed());
    }

    #[test]
    fn rejects_unrecognized_response_type() {
        let err = Response::parse(br#"{"t":99,"r":[]}"#).unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::MalformedFrame { .. }));
    }
}
