//! The single multiplexed connection: a TCP socket wrapping the handshake and a token-keyed
//! request/response dispatcher, with a serialized writer and one reader task.

use std::{
    collections::HashMap,
    sync::{atomic::{AtomicU64, Ordering}, Arc},
};

use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, Mutex},
};
use tokio_util::sync::CancellationToken;

use crate::{
    context::Context,
    error::{Error, Result},
    handshake,
    options::ConnectOptions,
    query::Token,
    runtime, wire,
};

/// The per-token channel the reader task feeds and [`Connection::send`] drains. Paired with its
/// own receiver so `send` can lock just the piece it needs without blocking other tokens.
struct TokenChannel {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl TokenChannel {
    fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            sender,
            receiver: Mutex::new(receiver),
        })
    }
}

struct Shared {
    writer: Mutex<OwnedWriteHalf>,
    dispatch: Mutex<HashMap<Token, Arc<TokenChannel>>>,
    next_token: AtomicU64,
    closed: CancellationToken,
    close_error: Mutex<Option<Error>>,
}

/// A live, authenticated connection. Cheap to clone: every clone shares the same socket, writer
/// mutex, and dispatch table.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Dials `options.host:options.port`, performs the SCRAM handshake, and spawns the reader
    /// task. The whole operation is bounded by `options.connect_timeout`.
    pub async fn connect(ctx: &Context, options: &ConnectOptions) -> Result<Self> {
        let ctx = ctx.with_timeout(options.connect_timeout);
        let addr = format!("{}:{}", options.host, options.port);

        let mut stream = tokio::select! {
            biased;
            _ = ctx.done() => return Err(ctx.err()),
            result = TcpStream::connect(&addr) => result?,
        };
        stream.set_nodelay(true)?;

        tokio::select! {
            biased;
            _ = ctx.done() => return Err(ctx.err()),
            result = handshake::perform(&mut stream, &options.username, &options.password) => result?,
        }

        tracing::debug!(host = %options.host, port = options.port, "handshake complete");

        let (reader, writer) = stream.into_split();
        let shared = Arc::new(Shared {
            writer: Mutex::new(writer),
            dispatch: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            closed: CancellationToken::new(),
            close_error: Mutex::new(None),
        });

        let reader_shared = shared.clone();
        runtime::spawn(async move {
            reader_loop(reader, reader_shared).await;
        });

        Ok(Self { shared })
    }

    /// Atomically allocates the next query token.
    pub fn next_token(&self) -> Token {
        self.shared.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Whether this connection has torn itself down, whether by an explicit [`Connection::close`]
    /// or because the reader loop hit a fatal transport error. [`crate::manager::Manager`] uses
    /// this to decide whether a held connection needs to be redialed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Sends `payload` tagged with `token`, then waits for the next frame the reader delivers for
    /// that same token — racing the wait against `ctx`'s cancellation/deadline and against the
    /// connection being closed.
    ///
    /// A cursor calls this repeatedly with the same token across `START`/`CONTINUE`/`STOP`; each
    /// call consumes exactly one queued response. Callers are responsible for calling
    /// [`Connection::forget`] once a token has received its terminal response.
    pub async fn send(&self, ctx: &Context, token: Token, payload: &[u8]) -> Result<Vec<u8>> {
        if self.shared.closed.is_cancelled() {
            return Err(self.closed_error().await);
        }

        let channel = self.register(token).await;

        {
            let mut writer = self.shared.writer.lock().await;
            if self.shared.closed.is_cancelled() {
                return Err(self.closed_error().await);
            }
            if let Err(err) = wire::write_frame(&mut *writer, token, payload).await {
                self.close_with_error(err.clone()).await;
                return Err(err);
            }
        }

        let mut receiver = channel.receiver.lock().await;
        tokio::select! {
            biased;
            _ = ctx.done() => {
                self.forget(token).await;
                Err(ctx.err())
            }
            _ = self.shared.closed.cancelled() => {
                Err(self.closed_error().await)
            }
            frame = receiver.recv() => {
                frame.ok_or(Error::conn_closed())
            }
        }
    }

    /// Deregisters `token`'s dispatch channel. Any frame the reader subsequently delivers for it
    /// is dropped silently (a late response after `STOP`).
    pub async fn forget(&self, token: Token) {
        self.shared.dispatch.lock().await.remove(&token);
    }

    /// Idempotently tears the connection down: cancels every waiting [`Connection::send`], shuts
    /// down the socket, and clears the dispatch table.
    pub async fn close(&self) {
        self.close_with_error(Error::conn_closed()).await;
    }

    async fn close_with_error(&self, err: Error) {
        if self.shared.closed.is_cancelled() {
            return;
        }
        tracing::debug!(error = %err, "closing connection");
        *self.shared.close_error.lock().await = Some(err);
        self.shared.closed.cancel();
        let mut writer = self.shared.writer.lock().await;
        let _ = writer.shutdown().await;
        self.shared.dispatch.lock().await.clear();
    }

    async fn register(&self, token: Token) -> Arc<TokenChannel> {
        self.shared
            .dispatch
            .lock()
            .await
            .entry(token)
            .or_insert_with(TokenChannel::new)
            .clone()
    }

    async fn closed_error(&self) -> Error {
        self.shared
            .close_error
            .lock()
            .await
            .clone()
            .unwrap_or_else(Error::conn_closed)
    }
}

/// Reads frames off the socket until it closes or errors, dispatching each by token. A token with
/// no registered channel (a late response after `STOP`) is dropped silently.
async fn reader_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>) {
    loop {
        match wire::read_frame(&mut reader).await {
            Ok((token, payload)) => {
                tracing::trace!(token, bytes = payload.len(), "dispatching frame");
                let dispatch = shared.dispatch.lock().await;
                if let Some(channel) = dispatch.get(&token) {
                    let _ = channel.sender.send(payload);
                } else {
                    tracing::trace!(token, "dropping frame for unregistered token");
                }
            }
            Err(err) => {
                if shared.closed.is_cancelled() {
                    return;
                }
                tracing::debug!(error = %err, "reader loop terminating");
                *shared.close_error.lock().await = Some(err);
                shared.closed.cancel();
                shared.dispatch.lock().await.clear();
                return;
            }
        }
    }
}

/// Test-only helpers for standing up a connected, handshaken [`Connection`] without a real
/// server. Shared between this module's own tests and [`crate::cursor`]'s.
#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use tokio::{io::AsyncReadExt, net::TcpListener};

    use super::*;

    /// Dials a loopback listener through a fake handshake server and returns the resulting
    /// [`Connection`], for tests that need a real connection but don't care what's on the other
    /// end of it.
    pub(crate) async fn connected_pair() -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handshake_server(stream).await;
        });

        let options = ConnectOptions::builder()
            .host(addr.ip().to_string())
            .port(addr.port())
            .connect_timeout(Duration::from_secs(5))
            .build();
        Connection::connect(&Context::background(), &options)
            .await
            .unwrap()
    }

    pub(crate) async fn handshake_server(mut stream: TcpStream) {
        use tokio::io::AsyncWriteExt;

        let mut magic = [0_u8; 4];
        stream.read_exact(&mut magic).await.unwrap();

        let mut hello = Vec::new();
        let mut byte = [0_u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == 0 {
                break;
            }
            hello.push(byte[0]);
        }
        let hello: serde_json::Value = serde_json::from_slice(&hello).unwrap();
        let client_first = hello["authentication"].as_str().unwrap().to_owned();
        let client_nonce = client_first.rsplit("r=").next().unwrap().to_owned();

        write_line(
            &mut stream,
            &serde_json::json!({"success": true, "server_version": "test"}),
        )
        .await;

        let combined_nonce = format!("{client_nonce}server");
        write_line(
            &mut stream,
            &serde_json::json!({
                "success": true,
                "authentication": format!("r={combined_nonce},s=aGVsbG8=,i=4096"),
            }),
        )
        .await;

        let mut client_final = Vec::new();
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == 0 {
                break;
            }
            client_final.push(byte[0]);
        }
        let client_final: serde_json::Value = serde_json::from_slice(&client_final).unwrap();
        let client_final = client_final["authentication"].as_str().unwrap().to_owned();

        let client_first_bare = client_first.trim_start_matches("n,,");
        let server_first = format!("r={combined_nonce},s=aGVsbG8=,i=4096");
        let without_proof = client_final.split(",p=").next().unwrap();
        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");

        let salt = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, "aGVsbG8=")
            .unwrap();
        let mut salted_password = [0_u8; 32];
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(b"", &salt, 4096, &mut salted_password);
        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());

        write_line(
            &mut stream,
            &serde_json::json!({
                "success": true,
                "authentication": format!(
                    "v={}",
                    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, server_signature)
                ),
            }),
        )
        .await;

        let (token, payload) = wire::read_frame(&mut stream).await.unwrap();
        wire::write_frame(&mut stream, token, &payload).await.unwrap();
    }

    async fn write_line(stream: &mut TcpStream, value: &serde_json::Value) {
        let mut bytes = serde_json::to_vec(value).unwrap();
        bytes.push(0);
        stream.write_all(&bytes).await.unwrap();
        stream.flush().await.unwrap();
    }

    fn hmac_sha256(key: &[u8], input: &[u8]) -> Vec<u8> {
        use hmac::Mac;
        let mut mac = <hmac::Hmac<sha2::Sha256> as Mac>::new_from_slice(key).unwrap();
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}
