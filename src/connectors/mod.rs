// Structural connectors
//
// Connectors compose child chainables. Three families:
//
// - Sequential: Sequence, Filter, Switch, Fallback, Handle - one child runs
//   at a time, errors stop the walk and propagate with a path prefix.
// - Concurrent: Concurrent, Race, Contest - clone the payload per branch,
//   spawn tasks, reconcile completions.
// - Resilience: Timeout, Retry, Backoff, CircuitBreaker, RateLimiter -
//   stateful wrappers that decide whether and when inner work runs.

use crate::chainable::{DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::panics::panic_failure;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;
use tokio::time::Instant;

mod backoff;
mod circuit_breaker;
mod concurrent;
mod contest;
mod fallback;
mod filter;
mod handle;
mod race;
mod rate_limiter;
mod retry;
mod sequence;
mod switch;
mod timeout;

/// Spawn one branch of a fan-out connector into a join set
///
/// The branch runs under deferred recovery: a panicking child (one that is
/// not itself a leaf adapter with its own containment) becomes a structured
/// error attributed to that child, never an unwind through the connector.
pub(crate) fn spawn_branch<T: Payload>(
    set: &mut JoinSet<ProcessResult<T>>,
    child: &DynChainable<T>,
    ctx: &Context,
    input: &T,
) {
    let child = child.clone();
    let ctx = ctx.clone();
    let input = input.clone();
    set.spawn(async move {
        let started = Instant::now();
        let kept = input.clone();
        match AssertUnwindSafe(child.process(ctx, input)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(PipelineError::from_cause(
                child.identity(),
                panic_failure(payload.as_ref()),
                kept,
                started.elapsed(),
            )),
        }
    });
}

pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use concurrent::Concurrent;
pub use contest::Contest;
pub use fallback::Fallback;
pub use filter::Filter;
pub use handle::Handle;
pub use race::Race;
pub use rate_limiter::{RateLimiter, RateLimiterMode};
pub use retry::Retry;
pub use sequence::Sequence;
pub use switch::Switch;
pub use timeout::Timeout;
