//! The cursor engine: a single streaming state machine shared by all three cursor variants, which
//! differ only in how they're seeded and how a terminal `Sequence` response is interpreted.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use futures_core::Stream;
use tokio::sync::{Mutex, Notify, OnceCell};

use crate::{
    conn::Connection,
    context::Context,
    error::{Error, Result},
    proto::QueryType,
    query::{self, Token},
    response::Response,
};

/// How a cursor was seeded, which governs what a later `Sequence` response means.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    /// The first response already carried everything (`Atom`, a non-partial `Sequence`,
    /// `WaitComplete`, `ServerInfo`): no further fetching ever happens.
    Terminal,
    /// A plain streaming cursor: a later `Sequence` response is the expected end of the stream.
    Streaming,
    /// A changefeed: streams forever; a `Sequence` response is a protocol violation rather than a
    /// normal end, and `all()` is refused outright since the stream is unbounded.
    Changefeed,
}

struct CursorState {
    buf: Vec<serde_json::Value>,
    pos: usize,
    partial: bool,
    done: bool,
    err: Option<Error>,
    fetching: bool,
}

struct Shared {
    conn: Connection,
    token: Token,
    mode: Mode,
    ctx: Context,
    state: Mutex<CursorState>,
    notify: Notify,
    stop_once: OnceCell<()>,
}

impl Shared {
    /// Implements the `Next` contract, looping to re-check `buf` after a fetch completes instead
    /// of recursing.
    async fn next(&self) -> Result<Option<serde_json::Value>> {
        loop {
            let mut state = self.state.lock().await;
            if let Some(err) = &state.err {
                return Err(err.clone());
            }
            if state.pos < state.buf.len() {
                let value = state.buf[state.pos].clone();
                state.pos += 1;
                return Ok(Some(value));
            }
            if state.done {
                return Ok(None);
            }
            if state.fetching {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                drop(state);
                notified.await;
                continue;
            }
            state.fetching = true;
            drop(state);

            let fetched = self.fetch_next_batch().await;

            let mut state = self.state.lock().await;
            state.fetching = false;
            match fetched {
                Err(err) => {
                    state.err = Some(err.clone());
                    drop(state);
                    self.notify.notify_waiters();
                    return Err(err);
                }
                Ok(response) => {
                    if let Err(err) = self.apply(&mut state, response) {
                        state.err = Some(err.clone());
                        drop(state);
                        self.notify.notify_waiters();
                        return Err(err);
                    }
                    drop(state);
                    self.notify.notify_waiters();
                }
            }
        }
    }

    /// Applies a freshly-fetched response to `state`, classifying it by response type and mode.
    fn apply(&self, state: &mut CursorState, response: Response) -> Result<()> {
        if response.is_error() {
            return Err(response.into_error());
        }
        use crate::proto::ResponseType::*;
        match response.response_type {
            Sequence if self.mode == Mode::Changefeed => {
                return Err(Error::unexpected_response(
                    "changefeed cursor received a terminal sequence response",
                ))
            }
            Sequence => state.done = true,
            Partial => state.partial = true,
            _ => {
                return Err(Error::unexpected_response(format!(
                    "cursor received an unexpected response type {:?}",
                    response.response_type
                )))
            }
        }
        state.buf = response.results;
        state.pos = 0;
        Ok(())
    }

    async fn fetch_next_batch(&self) -> Result<Response> {
        let partial = self.state.lock().await.partial;
        if !partial {
            return Err(Error::unexpected_response(
                "cursor has no more data to fetch but is not done",
            ));
        }
        tracing::trace!(token = self.token, "sending CONTINUE");
        let payload = serde_json::to_vec(&query::build_bare_query(QueryType::Continue))?;
        match self.conn.send(&self.ctx, self.token, &payload).await {
            Ok(raw) => Response::parse(&raw),
            Err(err) if err.is_canceled() || err.is_deadline_exceeded() => {
                self.stop().await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Emits `STOP` at most once, guarded by a close-once cell. Concurrent callers all await the
    /// same in-flight `STOP`.
    async fn stop(&self) {
        let token = self.token;
        let conn = self.conn.clone();
        self.stop_once
            .get_or_init(|| async move {
                tracing::debug!(token, "sending STOP");
                let payload = serde_json::to_vec(&query::build_bare_query(QueryType::Stop))
                    .unwrap_or_default();
                let _ = conn.send(&Context::background(), token, &payload).await;
                conn.forget(token).await;
            })
            .await;
    }
}

/// A live result cursor, covering the atom/sequence/partial/changefeed shapes a query's first
/// response can take. Cheap to clone; clones share the same underlying fetch state but poll
/// independently (each clone gets its own in-flight [`Stream::poll_next`] future).
pub struct Cursor {
    shared: Arc<Shared>,
    in_flight: Option<Pin<Box<dyn Future<Output = Result<Option<serde_json::Value>>> + Send>>>,
}

impl Clone for Cursor {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            in_flight: None,
        }
    }
}

impl Cursor {
    /// Builds a cursor already seeded with a terminal response (`Atom`, a non-partial
    /// `Sequence`, `WaitComplete`, `ServerInfo`): no further network traffic is ever needed.
    pub(crate) fn terminal(conn: Connection, token: Token, ctx: Context, results: Vec<serde_json::Value>) -> Self {
        Self::new(conn, token, ctx, Mode::Terminal, results, false)
    }

    /// Builds a cursor seeded with the first `Partial` response of a non-changefeed stream.
    pub(crate) fn streaming(conn: Connection, token: Token, ctx: Context, results: Vec<serde_json::Value>) -> Self {
        Self::new(conn, token, ctx, Mode::Streaming, results, true)
    }

    /// Builds a cursor seeded with the first `Partial` response of a changefeed.
    pub(crate) fn changefeed(conn: Connection, token: Token, ctx: Context, results: Vec<serde_json::Value>) -> Self {
        Self::new(conn, token, ctx, Mode::Changefeed, results, true)
    }

    fn new(
        conn: Connection,
        token: Token,
        ctx: Context,
        mode: Mode,
        results: Vec<serde_json::Value>,
        partial: bool,
    ) -> Self {
        let shared = Arc::new(Shared {
            conn,
            token,
            mode,
            ctx,
            state: Mutex::new(CursorState {
                buf: results,
                pos: 0,
                partial,
                done: !partial,
                err: None,
                fetching: false,
            }),
            notify: Notify::new(),
            stop_once: OnceCell::new(),
        });
        Self {
            shared,
            in_flight: None,
        }
    }

    /// Yields the next result, fetching a new batch from the server if the current one is
    /// exhausted. Returns `Ok(None)` once the stream is exhausted; a changefeed cursor never
    /// returns `None` on its own.
    pub async fn next(&self) -> Result<Option<serde_json::Value>> {
        self.shared.next().await
    }

    /// Drains every remaining result. Refused on a changefeed, since the stream is unbounded.
    pub async fn all(&self) -> Result<Vec<serde_json::Value>> {
        if self.shared.mode == Mode::Changefeed {
            return Err(Error::unsupported(
                "all() is not supported on a changefeed cursor",
            ));
        }
        let mut results = Vec::new();
        while let Some(value) = self.next().await? {
            results.push(value);
        }
        Ok(results)
    }

    /// Emits `STOP` (unless the cursor already reached a terminal state on its own) and cancels
    /// the cursor's context, waking anything blocked on a fetch. Idempotent and safe to call
    /// concurrently with itself or with [`Cursor::next`].
    pub async fn close(&self) {
        let already_terminal = {
            let state = self.shared.state.lock().await;
            state.done || state.err.is_some()
        };
        if !already_terminal {
            self.shared.stop().await;
        }
        self.shared.ctx.cancel();
        self.shared.notify.notify_waiters();
    }
}

impl Stream for Cursor {
    type Item = Result<serde_json::Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        if self.in_flight.is_none() {
            let shared = self.shared.clone();
            self.in_flight = Some(Box::pin(async move { shared.next().await }));
        }
        let poll = self.in_flight.as_mut().expect("just populated").as_mut().poll(cx);
        match poll {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                self.in_flight = None;
                match result {
                    Ok(Some(value)) => Poll::Ready(Some(Ok(value))),
                    Ok(None) => Poll::Ready(None),
                    Err(err) => Poll::Ready(Some(Err(err))),
                }
            }
        }
    }
}

impl Drop for Cursor {
    /// A cursor that's dropped without an explicit `close()` still needs its server-side query
    /// torn down. Only the last clone sharing a given `Shared` actually triggers this.
    fn drop(&mut self) {
        if Arc::strong_count(&self.shared) != 1 {
            return;
        }
        let shared = self.shared.clone();
        let already_terminal = match shared.state.try_lock() {
            Ok(state) => state.done || state.err.is_some(),
            Err(_) => false,
        };
        if already_terminal {
            return;
        }
        crate::runtime::spawn(async move {
            shared.stop().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn background_ctx() -> Context {
        Context::background()
    }

    #[tokio::test]
    async fn atom_cursor_yields_once_then_ends() {
        let results = vec![serde_json::json!("hello")];
        let cursor = build_terminal_cursor(results).await;
        assert_eq!(cursor.next().await.unwrap(), Some(serde_json::json!("hello")));
        assert_eq!(cursor.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn all_drains_a_terminal_cursor() {
        let results = vec![serde_json::json!(1), serde_json::json!(2)];
        let cursor = build_terminal_cursor(results.clone()).await;
        assert_eq!(cursor.all().await.unwrap(), results);
    }

    #[tokio::test]
    async fn changefeed_cursor_refuses_all() {
        let conn = crate::conn::test_support::connected_pair().await;
        let cursor = Cursor::changefeed(conn, 1, background_ctx(), vec![serde_json::json!(1)]);
        let err = cursor.all().await.unwrap_err();
        assert!(matches!(*err.kind, crate::error::ErrorKind::Unsupported { .. }));
    }

    #[tokio::test]
    async fn close_on_a_terminal_cursor_does_not_emit_stop() {
        let cursor = build_terminal_cursor(vec![serde_json::json!(1)]).await;
        cursor.close().await;
        // Draining still works: close() on an already-terminal cursor is a no-op beyond
        // canceling the (already-unused) context.
        assert_eq!(cursor.next().await.unwrap(), Some(serde_json::json!(1)));
    }

    async fn build_terminal_cursor(results: Vec<serde_json::Value>) -> Cursor {
        let conn = crate::conn::test_support::connected_pair().await;
        Cursor::terminal(conn, 1, background_ctx(), results)
    }
}
