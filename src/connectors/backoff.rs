// Backoff connector - re-attempts with exponential delays

use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Like [`super::Retry`], but sleeps between attempts with exponential
/// doubling: `initial_delay * 2^(k-1)` after the k-th failure
///
/// The sleep races against the context, so a cancellation or deadline
/// during the wait returns immediately without a further attempt.
pub struct Backoff<T> {
    identity: Identity,
    inner: DynChainable<T>,
    max_attempts: u32,
    initial_delay: Duration,
    sink: Option<SharedSink>,
}

impl<T: Payload> Backoff<T> {
    pub fn new(
        identity: impl Into<Identity>,
        inner: DynChainable<T>,
        max_attempts: u32,
        initial_delay: Duration,
    ) -> Self {
        Self {
            identity: identity.into(),
            inner,
            max_attempts: max_attempts.max(1),
            initial_delay,
            sink: None,
        }
    }

    /// Attach an observability sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn run(&self, ctx: &Context, input: T, started: Instant) -> ProcessResult<T> {
        let mut delay = self.initial_delay;
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
                        backoff = %self.identity,
                        attempt,
                        max_attempts = self.max_attempts,
                        next_delay = ?delay,
                        error = %err,
                        "attempt failed"
                    );
                    last_err = Some(err);
                }
            }
            if attempt < self.max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    ctx_err = ctx.done() => {
                        return Err(PipelineError::from_context(
                            self.identity.clone(),
                            ctx_err,
                            input,
                            started.elapsed(),
                        ));
                    }
                }
                delay *= 2;
            }
        }
        Err(last_err
            .expect("at least one attempt ran")
            .with_prefix(self.identity.clone()))
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Backoff<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = self.run(&ctx, input, started).await;
        emit(
            &self.sink,
            Kind::Backoff,
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
            Kind::Backoff,
            self.identity.clone(),
            vec![self.inner.identity()],
        )
    }

    fn close(&self) -> anyhow::Result<()> {
        self.inner.close()
    }
}
