// Structured pipeline errors
//
// Every failure the runtime reports is a `PipelineError<T>`: the original
// cause, the input as presented to the failing subtree's root, a
// root-to-leaf path of component identities, and timeout/canceled flags.
// Connectors that re-raise an error prepend their own identity, so the path
// always starts at the component the caller invoked.

use crate::context::ContextError;
use crate::identity::Identity;
use chrono::{DateTime, Utc};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Sentinel failures raised by the runtime itself
///
/// User-function failures arrive as `anyhow::Error` and are wrapped as-is;
/// these are the causes the runtime originates.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Failure {
    /// A switch computed a key with no registered route
    #[error("no route registered for key {0}")]
    RouteNotFound(String),
    /// A contest finished without any qualifying success
    #[error("no contestant produced a qualifying result")]
    NoWinner,
    /// A circuit breaker rejected the call in open or half-open-blocked state
    #[error("circuit breaker is open")]
    CircuitOpen,
    /// A rate limiter in drop mode found the bucket empty
    #[error("rate limit exceeded")]
    RateLimited,
    /// A recovered panic, message already sanitized
    #[error("recovered panic: {0}")]
    Panic(String),
}

/// Structured failure carrying the causal path through the pipeline
///
/// Clonable whenever `T` is, so error handlers can themselves be chainables
/// over `PipelineError<T>`.
pub struct PipelineError<T> {
    timestamp: DateTime<Utc>,
    duration: Duration,
    input_data: T,
    cause: Arc<dyn StdError + Send + Sync + 'static>,
    path: Vec<Identity>,
    timeout: bool,
    canceled: bool,
}

impl<T> PipelineError<T> {
    /// Wrap a concrete cause raised at `identity`
    ///
    /// Timeout/canceled flags are derived when the cause is a
    /// [`ContextError`].
    pub fn from_cause(
        identity: Identity,
        cause: impl StdError + Send + Sync + 'static,
        input: T,
        duration: Duration,
    ) -> Self {
        let (timeout, canceled) = flags_for(&cause);
        Self {
            timestamp: Utc::now(),
            duration,
            input_data: input,
            cause: Arc::new(cause),
            path: vec![identity],
            timeout,
            canceled,
        }
    }

    /// Wrap a user-function error raised at `identity`
    ///
    /// The anyhow chain is scanned for an embedded [`ContextError`] so a
    /// user function that observed cancellation and returned the context's
    /// error still produces correctly flagged failures.
    pub fn from_anyhow(
        identity: Identity,
        err: anyhow::Error,
        input: T,
        duration: Duration,
    ) -> Self {
        let mut timeout = false;
        let mut canceled = false;
        for cause in err.chain() {
            if let Some(ctx_err) = cause.downcast_ref::<ContextError>() {
                match ctx_err {
                    ContextError::DeadlineExceeded => timeout = true,
                    ContextError::Canceled => canceled = true,
                }
            }
        }
        let boxed: Box<dyn StdError + Send + Sync + 'static> = err.into();
        Self {
            timestamp: Utc::now(),
            duration,
            input_data: input,
            cause: Arc::from(boxed),
            path: vec![identity],
            timeout,
            canceled,
        }
    }

    /// Failure observed from a done context at `identity`
    pub fn from_context(
        identity: Identity,
        ctx_err: ContextError,
        input: T,
        duration: Duration,
    ) -> Self {
        Self::from_cause(identity, ctx_err, input, duration)
    }

    /// Prepend a connector's identity while re-raising
    pub fn with_prefix(mut self, identity: Identity) -> Self {
        self.path.insert(0, identity);
        self
    }

    /// Force the timeout flag (used by the timeout boundary)
    pub(crate) fn flag_timeout(mut self) -> Self {
        self.timeout = true;
        self
    }

    /// Single-line rendering, identical to the `Display` output
    pub fn error(&self) -> String {
        self.to_string()
    }

    /// The immediate cause
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// Walk the cause chain to the original error
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self.cause.as_ref();
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    /// Whether the failure originated from a deadline elapse
    pub fn is_timeout(&self) -> bool {
        self.timeout
    }

    /// Whether the failure originated from explicit cancellation
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Root-to-leaf identities of the failing subtree
    pub fn path(&self) -> &[Identity] {
        &self.path
    }

    /// The input as presented to the failing subtree's root
    pub fn input_data(&self) -> &T {
        &self.input_data
    }

    /// Recover the captured input
    pub fn into_input_data(self) -> T {
        self.input_data
    }

    /// Wall-clock moment the failure was recorded
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Time spent in the innermost failing subtree
    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn path_display(&self) -> String {
        self.path
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn flags_for(cause: &(dyn StdError + 'static)) -> (bool, bool) {
    match cause.downcast_ref::<ContextError>() {
        Some(ContextError::DeadlineExceeded) => (true, false),
        Some(ContextError::Canceled) => (false, true),
        None => (false, false),
    }
}

impl<T: Clone> Clone for PipelineError<T> {
    fn clone(&self) -> Self {
        Self {
            timestamp: self.timestamp,
            duration: self.duration,
            input_data: self.input_data.clone(),
            cause: Arc::clone(&self.cause),
            path: self.path.clone(),
            timeout: self.timeout,
            canceled: self.canceled,
        }
    }
}

impl<T> fmt::Display for PipelineError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipeline error at {}: {} (duration={:?}, timeout={}, canceled={})",
            self.path_display(),
            self.cause,
            self.duration,
            self.timeout,
            self.canceled
        )
    }
}

// Manual Debug so payload types are not forced to implement it
impl<T> fmt::Debug for PipelineError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineError")
            .field("path", &self.path_display())
            .field("cause", &self.cause)
            .field("duration", &self.duration)
            .field("timeout", &self.timeout)
            .field("canceled", &self.canceled)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl<T> StdError for PipelineError<T> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}
