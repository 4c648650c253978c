// Circuit breaker connector - fail fast while downstream is unhealthy
//
// Three-state machine:
//
// ```text
//            failures >= threshold
//   closed ─────────────────────────> open
//     ^                                │ reset_after elapsed,
//     │ probe succeeds                 v next call probes
//     └──────────────────── half-open ─┐
//                  ^                   │ probe fails
//                  └───────────────────┘ (back to open)
// ```
//
// All transitions happen under one mutex; the inner call itself runs
// outside it. Half-open admits exactly one concurrent probe.

use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::{Failure, PipelineError};
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, Outcome, SharedSink};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Admission state of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted
    Closed,
    /// Calls fail fast without touching inner
    Open,
    /// One probe call is allowed through; others fail fast
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    probing: bool,
}

enum Admission {
    Allow { probe: bool },
    Reject,
}

/// Wraps a chainable and sheds load after repeated failures
pub struct CircuitBreaker<T> {
    identity: Identity,
    inner: DynChainable<T>,
    failure_threshold: u32,
    reset_after: Duration,
    state: Mutex<BreakerState>,
    sink: Option<SharedSink>,
}

impl<T: Payload> CircuitBreaker<T> {
    pub fn new(
        identity: impl Into<Identity>,
        inner: DynChainable<T>,
        failure_threshold: u32,
        reset_after: Duration,
    ) -> Self {
        Self {
            identity: identity.into(),
            inner,
            failure_threshold: failure_threshold.max(1),
            reset_after,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                probing: false,
            }),
            sink: None,
        }
    }

    /// Attach an observability sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Current admission state
    pub fn state(&self) -> CircuitState {
        self.state.lock().unwrap().state
    }

    /// Consecutive failures counted while closed
    pub fn failures(&self) -> u32 {
        self.state.lock().unwrap().failures
    }

    /// Force the breaker closed, clearing all counters
    pub fn reset(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.state = CircuitState::Closed;
        guard.failures = 0;
        guard.opened_at = None;
        guard.probing = false;
    }

    fn admit(&self) -> Admission {
        let mut guard = self.state.lock().unwrap();
        match guard.state {
            CircuitState::Closed => Admission::Allow { probe: false },
            CircuitState::Open => {
                let elapsed = guard
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.reset_after {
                    guard.state = CircuitState::HalfOpen;
                    guard.probing = true;
                    tracing::debug!(breaker = %self.identity, "half-open, probing");
                    Admission::Allow { probe: true }
                } else {
                    Admission::Reject
                }
            }
            CircuitState::HalfOpen => {
                if guard.probing {
                    Admission::Reject
                } else {
                    guard.probing = true;
                    Admission::Allow { probe: true }
                }
            }
        }
    }

    fn record(&self, outcome: ProbeOutcome, probe: bool) {
        let mut guard = self.state.lock().unwrap();
        if probe {
            guard.probing = false;
            match outcome {
                ProbeOutcome::Success => {
                    tracing::debug!(breaker = %self.identity, "probe succeeded, closing");
                    guard.state = CircuitState::Closed;
                    guard.failures = 0;
                    guard.opened_at = None;
                }
                ProbeOutcome::Failure => {
                    tracing::debug!(breaker = %self.identity, "probe failed, reopening");
                    guard.state = CircuitState::Open;
                    guard.opened_at = Some(Instant::now());
                }
                // A cancelled probe says nothing about downstream health;
                // stay half-open so the next call probes again
                ProbeOutcome::Inconclusive => {}
            }
            return;
        }
        if guard.state != CircuitState::Closed {
            return;
        }
        match outcome {
            ProbeOutcome::Success => guard.failures = 0,
            ProbeOutcome::Failure => {
                guard.failures += 1;
                if guard.failures >= self.failure_threshold {
                    tracing::warn!(
                        breaker = %self.identity,
                        failures = guard.failures,
                        "failure threshold reached, opening"
                    );
                    guard.state = CircuitState::Open;
                    guard.opened_at = Some(Instant::now());
                }
            }
            ProbeOutcome::Inconclusive => {}
        }
    }
}

enum ProbeOutcome {
    Success,
    Failure,
    Inconclusive,
}

#[async_trait]
impl<T: Payload> Chainable<T> for CircuitBreaker<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let probe = match self.admit() {
            Admission::Allow { probe } => probe,
            Admission::Reject => {
                let err = PipelineError::from_cause(
                    self.identity.clone(),
                    Failure::CircuitOpen,
                    input,
                    started.elapsed(),
                );
                emit(
                    &self.sink,
                    Kind::CircuitBreaker,
                    &self.identity,
                    started.elapsed(),
                    Outcome::Rejected,
                );
                return Err(err);
            }
        };

        let result = self.inner.process(ctx, input).await;
        let outcome = match &result {
            Ok(_) => ProbeOutcome::Success,
            // Cancellation is the caller's doing, not downstream sickness
            Err(err) if err.is_canceled() => ProbeOutcome::Inconclusive,
            Err(_) => ProbeOutcome::Failure,
        };
        self.record(outcome, probe);

        let result = result.map_err(|err| err.with_prefix(self.identity.clone()));
        emit(
            &self.sink,
            Kind::CircuitBreaker,
            &self.identity,
            started.elapsed(),
            outcome_of(&result),
        );
        result
    }

    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    fn schema(&self) -> Schema {
        Schema::composite(
            Kind::CircuitBreaker,
            self.identity.clone(),
            vec![self.inner.identity()],
        )
    }

    fn close(&self) -> anyhow::Result<()> {
        self.inner.close()
    }
}
