//! Top-level facade wrapping a [`Manager`] and its [`ConnectOptions`]. This is the entry point
//! most callers reach for rather than driving [`crate::conn::Connection`] and [`crate::executor`]
//! directly.

use std::collections::BTreeMap;

use crate::{
    context::Context,
    cursor::Cursor,
    error::Result,
    executor::{self, RunOutcome, ServerInfo},
    manager::Manager,
    options::ConnectOptions,
    term::Term,
};

/// A client bound to a single server, backed by at most one live connection at a time.
pub struct Client {
    manager: Manager,
}

impl Client {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            manager: Manager::new(options),
        }
    }

    /// Dials (if not already connected) and runs `term`, returning a cursor over its results.
    /// Returns `None` when `opts` requested `noreply: true`.
    pub async fn run(
        &self,
        ctx: &Context,
        term: &Term,
        opts: Option<&BTreeMap<String, Term>>,
    ) -> Result<Option<Cursor>> {
        let conn = self.manager.get(ctx).await?;
        match executor::run(ctx, &conn, term, opts).await? {
            RunOutcome::Cursor(cursor) => Ok(Some(cursor)),
            RunOutcome::NoReply => Ok(None),
        }
    }

    /// Fetches the connected server's name, id, and version.
    pub async fn server_info(&self, ctx: &Context) -> Result<ServerInfo> {
        let conn = self.manager.get(ctx).await?;
        executor::server_info(ctx, &conn).await
    }

    /// Blocks until every outstanding `noreply` query on the current connection has completed.
    pub async fn noreply_wait(&self, ctx: &Context) -> Result<()> {
        let conn = self.manager.get(ctx).await?;
        executor::noreply_wait(ctx, &conn).await
    }

    /// Tears down the current connection, if any, and marks the client closed.
    pub async fn close(&self) {
        self.manager.close().await;
    }
}
