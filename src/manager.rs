//! Holds at most one live connection, dialing lazily and redialing after a failure.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    conn::Connection,
    context::Context,
    error::{Error, Result},
    options::ConnectOptions,
};

struct State {
    connection: Option<Connection>,
    closed: bool,
}

/// A lazily-dialing single-connection pool. `Get` returns the held connection if one is live,
/// otherwise dials a fresh one under a mutex; `Close` tears it down and marks the manager closed,
/// after which every subsequent `Get` fails.
pub struct Manager {
    options: ConnectOptions,
    state: Mutex<State>,
}

impl Manager {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            options,
            state: Mutex::new(State {
                connection: None,
                closed: false,
            }),
        }
    }

    /// Returns the held connection, dialing one first if none is held. Dial failures propagate to
    /// the caller and leave the manager free to retry on the next call.
    pub async fn get(&self, ctx: &Context) -> Result<Connection> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::conn_closed());
        }
        if let Some(connection) = &state.connection {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
            tracing::debug!("held connection is closed, redialing");
            state.connection = None;
        }
        let connection = Connection::connect(ctx, &self.options).await?;
        state.connection = Some(connection.clone());
        Ok(connection)
    }

    /// Tears the held connection down (if any) and marks the manager closed. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(connection) = state.connection.take() {
            connection.close().await;
        }
    }
}
