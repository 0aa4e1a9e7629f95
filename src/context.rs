//! A per-call context carrying a deadline and a cancellation signal, for cooperative
//! cancellation. Every suspension point in this crate (`Connection::send`, `Cursor::next`)
//! accepts a `&Context` and races it against whatever it's actually waiting on.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// A context that is never canceled and has no deadline. Most top-level calls that don't need
/// cooperative cancellation can pass `Context::background()`.
#[derive(Clone, Debug)]
pub struct Context {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context with no deadline that is only canceled if explicitly canceled via
    /// [`Context::cancel`] or a derived child (see [`Context::with_cancel`]).
    pub fn background() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context derived from `self` that is canceled automatically once `timeout` elapses, in
    /// addition to everything that would cancel `self`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: Some(match self.deadline {
                Some(existing) if existing < deadline => existing,
                _ => deadline,
            }),
        }
    }

    /// A context derived from `self` with its own independent cancel switch; canceling `self`
    /// still cancels the child, but canceling the child has no effect on `self`.
    pub fn with_cancel(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancels this context and every context derived from it via [`Context::with_cancel`] or
    /// [`Context::with_timeout`].
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether this context has already been canceled or has an elapsed deadline.
    pub fn is_done(&self) -> bool {
        self.cancellation.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once this context is canceled or its deadline elapses. Intended for use inside
    /// `tokio::select!` alongside the future an operation is actually waiting on.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancellation.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancellation.cancelled().await,
        }
    }

    /// The error [`Context::done`] implies: [`Error::canceled`] if the cancellation token fired,
    /// [`Error::deadline_exceeded`] if the deadline elapsed. Only meaningful after
    /// [`Context::is_done`] returns `true`; the tie is broken in favor of cancellation since a
    /// caller that explicitly canceled generally wants to see that reflected back.
    pub fn err(&self) -> Error {
        if self.cancellation.is_cancelled() {
            Error::canceled()
        } else {
            Error::deadline_exceeded()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_context_never_completes_done_until_canceled() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        ctx.cancel();
        assert!(ctx.is_done());
        assert!(ctx.err().is_canceled());
    }

    #[tokio::test]
    async fn with_timeout_completes_done_after_the_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(5));
        ctx.done().await;
        assert!(ctx.is_done());
        assert!(ctx.err().is_deadline_exceeded());
    }

    #[tokio::test]
    async fn canceling_parent_cancels_child() {
        let parent = Context::background();
        let child = parent.with_cancel();
        assert!(!child.is_done());
        parent.cancel();
        assert!(child.is_done());
    }

    #[tokio::test]
    async fn canceling_child_does_not_cancel_parent() {
        let parent = Context::background();
        let child = parent.with_cancel();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }
}
