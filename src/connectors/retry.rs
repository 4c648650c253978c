// Retry connector - bounded immediate re-attempts

use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use tokio::time::Instant;

/// Re-attempts its inner chainable up to `max_attempts` times, back to back
///
/// Cancellation and timeout-originated failures are never retried - the
/// context is telling us to stop, and a timed-out downstream will not get
/// faster by being hit again immediately. On exhaustion the last error
/// propagates.
pub struct Retry<T> {
    identity: Identity,
    inner: DynChainable<T>,
    max_attempts: u32,
    sink: Option<SharedSink>,
}

impl<T: Payload> Retry<T> {
    pub fn new(
        identity: impl Into<Identity>,
        inner: DynChainable<T>,
        max_attempts: u32,
    ) -> Self {
        Self {
            identity: identity.into(),
            inner,
            // Zero attempts would make the connector unconditionally fail;
            // treat it as one
            max_attempts: max_attempts.max(1),
            sink: None,
        }
    }

    /// Attach an observability sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn run(&self, ctx: &Context, input: T, started: Instant) -> ProcessResult<T> {
        let mut last_err: Option<PipelineError<T>> = None;
        for attempt in 1..=self.max_attempts {
            if let Some(ctx_err) = ctx.error() {
                return Err(PipelineError::from_context(
                    self.identity.clone(),
                    ctx_err,
                    input,
                    started.elapsed(),
                ));
            }
            match self.inner.process(ctx.clone(), input.clone()).await {
                Ok(out) => return Ok(out),
                Err(err) => {
                    if err.is_canceled() || err.is_timeout() {
                        return Err(err.with_prefix(self.identity.clone()));
                    }
                    tracing::debug!(
                        retry = %self.identity,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .expect("at least one attempt ran")
            .with_prefix(self.identity.clone()))
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Retry<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = self.run(&ctx, input, started).await;
        emit(
            &self.sink,
            Kind::Retry,
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
            Kind::Retry,
            self.identity.clone(),
            vec![self.inner.identity()],
        )
    }

    fn close(&self) -> anyhow::Result<()> {
        self.inner.close()
    }
}
