// Test doubles for pipeline assembly
//
// `Mock` is a programmable stand-in: script a sequence of outcomes, count
// calls, add latency. `Chaos` wraps a real chainable and injects failures
// and latency jitter for resilience testing. Both are ordinary chainables,
// so they compose anywhere a production component would.

use crate::adapters::call_contained;
use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// One scripted mock outcome
enum MockBehavior<T> {
    /// Return the input unchanged
    Passthrough,
    /// Return this value instead
    Return(T),
    /// Fail with this message
    Fail(String),
}

/// Programmable chainable for tests
///
/// Scripted behaviors are consumed in order; once the script is exhausted
/// every call passes the input through. Latency, if set, is applied before
/// the outcome and respects cancellation.
pub struct Mock<T> {
    identity: Identity,
    script: Mutex<VecDeque<MockBehavior<T>>>,
    calls: AtomicU32,
    latency: Option<Duration>,
}

impl<T: Payload> Mock<T> {
    pub fn new(identity: impl Into<Identity>) -> Self {
        Self {
            identity: identity.into(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            latency: None,
        }
    }

    /// Sleep this long before every outcome
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Script the next call to return the input unchanged
    pub fn then_passthrough(&self) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(MockBehavior::Passthrough);
        self
    }

    /// Script the next call to return `value`
    pub fn then_ok(&self, value: T) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(MockBehavior::Return(value));
        self
    }

    /// Script the next call to fail with `message`
    pub fn then_err(&self, message: impl Into<String>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(MockBehavior::Fail(message.into()));
        self
    }

    /// How many times `process` ran
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Mock<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                ctx_err = ctx.done() => {
                    return Err(PipelineError::from_context(
                        self.identity.clone(),
                        ctx_err,
                        input,
                        started.elapsed(),
                    ));
                }
            }
        }

        match self.script.lock().unwrap().pop_front() {
            None | Some(MockBehavior::Passthrough) => Ok(input),
            Some(MockBehavior::Return(value)) => Ok(value),
            Some(MockBehavior::Fail(message)) => Err(PipelineError::from_anyhow(
                self.identity.clone(),
                anyhow::anyhow!(message),
                input,
                started.elapsed(),
            )),
        }
    }

    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    fn schema(&self) -> Schema {
        Schema::leaf(Kind::Mock, self.identity.clone())
    }
}

/// Chaos injection knobs
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Probability in `[0, 1]` that a call fails before reaching inner
    pub failure_probability: f64,
    /// Lower bound of injected latency
    pub min_latency: Duration,
    /// Upper bound of injected latency
    pub max_latency: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            failure_probability: 0.1,
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
        }
    }
}

/// Wraps a chainable and injects failures and latency
pub struct Chaos<T> {
    identity: Identity,
    inner: DynChainable<T>,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
}

impl<T: Payload> Chaos<T> {
    pub fn new(identity: impl Into<Identity>, inner: DynChainable<T>, config: ChaosConfig) -> Self {
        Self {
            identity: identity.into(),
            inner,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seed the RNG for reproducible chaos
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn draw(&self) -> (Duration, bool) {
        let mut rng = self.rng.lock().unwrap();
        let latency = if self.config.max_latency > self.config.min_latency {
            let span = (self.config.max_latency - self.config.min_latency).as_millis() as u64;
            self.config.min_latency + Duration::from_millis(rng.gen_range(0..=span))
        } else {
            self.config.min_latency
        };
        let fail = rng.gen::<f64>() < self.config.failure_probability;
        (latency, fail)
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Chaos<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let (latency, fail) = call_contained(|| self.draw()).unwrap_or((Duration::ZERO, true));

        if latency > Duration::ZERO {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                ctx_err = ctx.done() => {
                    return Err(PipelineError::from_context(
                        self.identity.clone(),
                        ctx_err,
                        input,
                        started.elapsed(),
                    ));
                }
            }
        }

        if fail {
            tracing::debug!(chaos = %self.identity, "injecting failure");
            return Err(PipelineError::from_anyhow(
                self.identity.clone(),
                anyhow::anyhow!("injected chaos failure"),
                input,
                started.elapsed(),
            ));
        }

        self.inner
            .process(ctx, input)
            .await
            .map_err(|err| err.with_prefix(self.identity.clone()))
    }

    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    fn schema(&self) -> Schema {
        Schema::composite(
            Kind::Chaos,
            self.identity.clone(),
            vec![self.inner.identity()],
        )
    }

    fn close(&self) -> anyhow::Result<()> {
        self.inner.close()
    }
}
