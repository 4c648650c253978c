// Rate limiter connector - token bucket admission control
//
// A pass-through node: it hosts no inner chainable, it just decides whether
// the payload may continue (typically as an early member of a sequence).
// Refill is continuous at `rate` tokens per second up to `burst`, computed
// from a monotonic clock under the bucket mutex.

use crate::chainable::{Chainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::{Failure, PipelineError};
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, Outcome, SharedSink};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// What to do when the bucket is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimiterMode {
    /// Suspend until a token accrues (or the context is done)
    Wait,
    /// Fail immediately with [`Failure::RateLimited`]
    Drop,
}

struct BucketState {
    tokens: f64,
    rate: f64,
    burst: u32,
    last_refill: Instant,
    mode: RateLimiterMode,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst as f64);
        self.last_refill = now;
    }
}

/// Token-bucket admission gate
pub struct RateLimiter<T> {
    identity: Identity,
    state: Mutex<BucketState>,
    sink: Option<SharedSink>,
    _payload: PhantomData<fn(T) -> T>,
}

impl<T: Payload> RateLimiter<T> {
    /// `rate` tokens per second, `burst` bucket capacity; starts full
    ///
    /// Panics if `rate` is not positive or `burst` is zero.
    pub fn new(identity: impl Into<Identity>, rate: f64, burst: u32) -> Self {
        assert!(rate > 0.0, "rate must be positive");
        assert!(burst > 0, "burst must be at least 1");
        Self {
            identity: identity.into(),
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                rate,
                burst,
                last_refill: Instant::now(),
                mode: RateLimiterMode::Wait,
            }),
            sink: None,
            _payload: PhantomData,
        }
    }

    /// Attach an observability sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Start in the given mode
    pub fn with_mode(self, mode: RateLimiterMode) -> Self {
        self.state.lock().unwrap().mode = mode;
        self
    }

    /// Switch the empty-bucket behavior; calls already in flight keep the
    /// mode they observed at entry
    pub fn set_mode(&self, mode: RateLimiterMode) {
        self.state.lock().unwrap().mode = mode;
    }

    /// The current empty-bucket behavior
    pub fn mode(&self) -> RateLimiterMode {
        self.state.lock().unwrap().mode
    }

    /// Retarget the bucket; accrued tokens are kept, clamped to the new
    /// burst
    pub fn set_rate(&self, rate: f64, burst: u32) {
        assert!(rate > 0.0, "rate must be positive");
        assert!(burst > 0, "burst must be at least 1");
        let mut guard = self.state.lock().unwrap();
        guard.refill();
        guard.rate = rate;
        guard.burst = burst;
        guard.tokens = guard.tokens.min(burst as f64);
    }

    /// Approximate tokens currently available
    pub fn tokens(&self) -> f64 {
        let mut guard = self.state.lock().unwrap();
        guard.refill();
        guard.tokens
    }

    /// Try to take one token; on failure, report the wait until the next
    /// token and the mode observed
    fn try_acquire(&self) -> Result<(), (Duration, RateLimiterMode)> {
        let mut guard = self.state.lock().unwrap();
        guard.refill();
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            Ok(())
        } else {
            let wait_secs = (1.0 - guard.tokens) / guard.rate;
            Err((Duration::from_secs_f64(wait_secs.max(0.0)), guard.mode))
        }
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for RateLimiter<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        if let Some(ctx_err) = ctx.error() {
            return Err(PipelineError::from_context(
                self.identity.clone(),
                ctx_err,
                input,
                started.elapsed(),
            ));
        }

        // The mode observed on the first refusal holds for the whole call
        let mut wait = match self.try_acquire() {
            Ok(()) => None,
            Err((_, RateLimiterMode::Drop)) => {
                emit(
                    &self.sink,
                    Kind::RateLimiter,
                    &self.identity,
                    started.elapsed(),
                    Outcome::Rejected,
                );
                return Err(PipelineError::from_cause(
                    self.identity.clone(),
                    Failure::RateLimited,
                    input,
                    started.elapsed(),
                ));
            }
            Err((wait_for, RateLimiterMode::Wait)) => Some(wait_for),
        };

        while let Some(wait_for) = wait {
            tokio::select! {
                _ = tokio::time::sleep(wait_for) => {}
                ctx_err = ctx.done() => {
                    // No token was consumed for this call
                    let result = Err(PipelineError::from_context(
                        self.identity.clone(),
                        ctx_err,
                        input,
                        started.elapsed(),
                    ));
                    emit(
                        &self.sink,
                        Kind::RateLimiter,
                        &self.identity,
                        started.elapsed(),
                        outcome_of(&result),
                    );
                    return result;
                }
            }
            // Another waiter may have taken the token that accrued; if so,
            // go back to sleep for the next one
            wait = match self.try_acquire() {
                Ok(()) => None,
                Err((wait_for, _)) => Some(wait_for),
            };
        }

        emit(
            &self.sink,
            Kind::RateLimiter,
            &self.identity,
            started.elapsed(),
            Outcome::Ok,
        );
        Ok(input)
    }

    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    fn schema(&self) -> Schema {
        Schema::leaf(Kind::RateLimiter, self.identity.clone())
    }
}
