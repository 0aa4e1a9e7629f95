//! Thin async-runtime glue: a `spawn` wrapper so call sites never name `tokio` directly, and a
//! `timeout` helper that turns elapsed timers into this crate's own error type.

use std::{future::Future, time::Duration};

use crate::error::{Error, Result};

/// Spawns `fut` onto the current Tokio runtime.
pub fn spawn<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(fut)
}

/// Awaits `future`, failing with [`crate::error::ErrorKind::DeadlineExceeded`] if `duration`
/// elapses first.
pub async fn timeout<F: Future>(duration: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Error::deadline_exceeded())
}
