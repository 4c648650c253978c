// Cooperative cancellation context
//
// Every `process` call receives a `Context`. Cancellation is cooperative:
// connectors check the context between steps and suspended waits race
// against `done()`. Contexts form a tree - cancelling a parent cancels every
// context derived from it, and deadlines only shrink down a derivation
// chain.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context stopped accepting work
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// Explicit cancellation via a [`Canceller`] (or a cancelled ancestor)
    #[error("context canceled")]
    Canceled,
    /// The context's deadline elapsed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation scope handed to every `process` call
///
/// Cheap to clone; clones observe the same cancellation state. Derive
/// children with [`Context::with_cancel`], [`Context::with_timeout`], or
/// [`Context::with_deadline`].
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

/// Handle that cancels the context it was derived with
///
/// Dropping the canceller without calling [`Canceller::cancel`] leaves the
/// context live.
#[derive(Debug)]
pub struct Canceller {
    token: CancellationToken,
}

impl Canceller {
    /// Cancel the associated context and everything derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Context {
    /// Root context: no deadline, never cancelled
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a cancellable child context
    ///
    /// The child inherits this context's deadline and is cancelled when
    /// either the returned [`Canceller`] fires or this context is cancelled.
    pub fn with_cancel(&self) -> (Self, Canceller) {
        let child = self.token.child_token();
        let ctx = Self {
            token: child.clone(),
            deadline: self.deadline,
        };
        (ctx, Canceller { token: child })
    }

    /// Derive a child context that expires at `at`
    ///
    /// Deadlines only shrink: if this context already has an earlier
    /// deadline, the child keeps the earlier one.
    pub fn with_deadline(&self, at: Instant) -> (Self, Canceller) {
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(at)),
            None => Some(at),
        };
        let child = self.token.child_token();
        let ctx = Self {
            token: child.clone(),
            deadline,
        };
        (ctx, Canceller { token: child })
    }

    /// Derive a child context that expires `after` from now
    pub fn with_timeout(&self, after: Duration) -> (Self, Canceller) {
        self.with_deadline(Instant::now() + after)
    }

    /// The effective deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context has been cancelled or its deadline has elapsed
    pub fn is_done(&self) -> bool {
        self.error().is_some()
    }

    /// The reason the context is done, or `None` while it is live
    ///
    /// When a context is both past its deadline and explicitly cancelled,
    /// the deadline wins: a timeout-scoped failure should be flagged as a
    /// timeout even if the caller also tore the pipeline down.
    pub fn error(&self) -> Option<ContextError> {
        if let Some(at) = self.deadline {
            if Instant::now() >= at {
                return Some(ContextError::DeadlineExceeded);
            }
        }
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        None
    }

    /// Resolve when the context is done, reporting why
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(at) => {
                tokio::select! {
                    _ = self.token.cancelled() => self.error().unwrap_or(ContextError::Canceled),
                    _ = tokio::time::sleep_until(at) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }
}
