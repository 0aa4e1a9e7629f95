//! The magic-number-plus-JSON handshake that precedes the framed wire protocol. This module only
//! knows how to read and write null-terminated JSON documents against an async byte stream; it
//! has no opinion on what TCP stream it's given, which lets
//! [`crate::conn::Connection::connect`] drive it directly against the socket before the
//! token-multiplexed reader/writer tasks are spun up.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{Error, Result},
    proto::HandshakeVersion,
    scram::{ClientFinal, ClientFirst, ServerFinal, ServerFirst},
};

#[derive(Serialize)]
struct ClientHello<'a> {
    protocol_version: u32,
    authentication_method: &'a str,
    authentication: String,
}

#[derive(Serialize)]
struct ClientFinalMessage<'a> {
    authentication: &'a str,
}

/// The `success`/`server_version`/`error`-shaped documents the server sends at every step of the
/// handshake. Not every field is present at every step; absent fields default.
#[derive(Deserialize)]
struct ServerMessage {
    success: bool,
    #[serde(default)]
    server_version: Option<String>,
    #[serde(default)]
    authentication: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

/// Runs the full handshake over an already-connected stream: writes the magic number and
/// `client-hello`, reads `server-hello`, completes the SCRAM conversation, and reads
/// `server-final-auth`. Returns once the connection is ready to carry framed queries.
pub async fn perform<S>(stream: &mut S, username: &str, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client_first = ClientFirst::new(username);
    let hello = ClientHello {
        protocol_version: 0,
        authentication_method: "SCRAM-SHA-256",
        authentication: client_first.message(),
    };
    let hello_json = serde_json::to_vec(&hello)?;

    let mut preamble = Vec::with_capacity(4 + hello_json.len());
    preamble.extend_from_slice(&HandshakeVersion::IMPLEMENTED.as_le_bytes());
    preamble.extend_from_slice(&hello_json);
    stream.write_all(&preamble).await?;
    stream.write_all(&[0]).await?;
    stream.flush().await?;

    let server_hello = read_server_message(stream).await?;
    check_success(&server_hello)?;
    if server_hello
        .server_version
        .as_deref()
        .unwrap_or_default()
        .is_empty()
    {
        return Err(Error::handshake(
            "server-hello did not include a server_version",
        ));
    }

    let server_first_msg = read_server_message(stream).await?;
    check_success(&server_first_msg)?;
    let server_first_auth = server_first_msg.authentication.ok_or_else(|| {
        Error::handshake("server-first-auth did not include an authentication field")
    })?;
    let server_first = ServerFirst::parse(&server_first_auth)?;

    let client_final = ClientFinal::new(&client_first, &server_first, password)?;
    let client_final_message = ClientFinalMessage {
        authentication: client_final.message(),
    };
    write_json_line(stream, &serde_json::to_value(&client_final_message)?).await?;

    let server_final_msg = read_server_message(stream).await?;
    check_success(&server_final_msg)?;
    let server_final_auth = server_final_msg.authentication.ok_or_else(|| {
        Error::handshake("server-final-auth did not include an authentication field")
    })?;
    let server_final = ServerFinal::parse(&server_final_auth)?;
    server_final.verify(&client_final)?;

    Ok(())
}

/// A `success:false` message with an auth-domain error code becomes *ReqlAuth*; anything else
/// becomes the generic *Handshake* error.
fn check_success(message: &ServerMessage) -> Result<()> {
    if message.success {
        return Ok(());
    }
    let error = message.error.clone().unwrap_or_default();
    match message.error_code {
        Some(code) if is_auth_domain(code) => Err(Error::auth(error)),
        _ => Err(Error::handshake(error)),
    }
}

/// Auth-domain error codes, in the 10000000-19999999 range of the handshake error catalog.
fn is_auth_domain(code: i64) -> bool {
    (10_000_000..20_000_000).contains(&code)
}

async fn write_json_line<S: AsyncWrite + Unpin>(stream: &mut S, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    stream.write_all(&bytes).await?;
    stream.write_all(&[0]).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one null-terminated UTF-8 JSON document, byte by byte. The handshake only ever exchanges
/// a handful of short documents, so there's no benefit to a buffered reader here.
async fn read_server_message<S: AsyncRead + Unpin>(stream: &mut S) -> Result<ServerMessage> {
    let mut buf = Vec::new();
    let mut byte = [0_u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::handshake(
                "connection closed before the handshake completed",
            ));
        }
        if byte[0] == 0 {
            break;
        }
        buf.push(byte[0]);
    }
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_auth_domain_error_codes() {
        assert!(is_auth_domain(10_000_000));
        assert!(!is_auth_domain(4_100_000));
    }

    #[test]
    fn check_success_maps_auth_domain_error_to_reql_auth() {
        let message = ServerMessage {
            success: false,
            server_version: None,
            authentication: None,
            error: Some("wrong password".to_owned()),
            error_code: Some(10_000_000),
        };
        let err = check_success(&message).unwrap_err();
        assert!(matches!(*err.kind, crate::error::ErrorKind::ReqlAuth { .. }));
    }

    #[test]
    fn check_success_maps_other_error_to_handshake() {
        let message = ServerMessage {
            success: false,
            server_version: None,
            authentication: None,
            error: Some("bad protocol version".to_owned()),
            error_code: Some(1),
        };
        let err = check_success(&message).unwrap_err();
        assert!(matches!(*err.kind, crate::error::ErrorKind::Handshake { .. }));
    }
}
