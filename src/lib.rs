//! Client runtime for a JSON-framed document database wire protocol: a connection that performs
//! a SCRAM-SHA-256 handshake, multiplexes queries over a single socket by token, and exposes
//! query results through a cursor that transparently streams, paginates, or follows a changefeed.
//!
//! The entry point is [`Client`]; most other items are building blocks it's assembled from and
//! are exposed for callers who want to drive a connection directly.

pub mod client;
pub mod conn;
pub mod context;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod handshake;
pub mod manager;
pub mod options;
pub mod proto;
pub mod query;
pub mod response;
pub mod runtime;
pub mod scram;
pub mod term;
pub mod wire;

pub use client::Client;
pub use context::Context;
pub use cursor::Cursor;
pub use error::{Error, ErrorKind, Result};
pub use executor::ServerInfo;
pub use options::ConnectOptions;
pub use term::Term;
