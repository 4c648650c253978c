// Timeout connector - a deadline boundary around one chainable

use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::context::ContextError;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use crate::panics::panic_failure;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Bounds its inner chainable to a wall of `duration`
///
/// The inner work runs in its own task against a deadline-scoped child
/// context. On deadline elapse the child context is cancelled and a
/// timeout-flagged error returns immediately; the inner task keeps running
/// until it observes the cancellation, per the cooperative model. A result
/// that arrives before the deadline is returned verbatim (failures gain
/// this connector's path prefix).
pub struct Timeout<T> {
    identity: Identity,
    inner: DynChainable<T>,
    duration: Duration,
    sink: Option<SharedSink>,
}

impl<T: Payload> Timeout<T> {
    pub fn new(identity: impl Into<Identity>, inner: DynChainable<T>, duration: Duration) -> Self {
        Self {
            identity: identity.into(),
            inner,
            duration,
            sink: None,
        }
    }

    /// Attach an observability sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn run(&self, ctx: &Context, input: T, started: Instant) -> ProcessResult<T> {
        let (child_ctx, canceller) = ctx.with_timeout(self.duration);
        let deadline = child_ctx
            .deadline()
            .expect("deadline-scoped context always has a deadline");

        let inner = self.inner.clone();
        let task_input = input.clone();
        let task_ctx = child_ctx;
        let mut handle = tokio::spawn(async move {
            let kept = task_input.clone();
            let task_started = Instant::now();
            match AssertUnwindSafe(inner.process(task_ctx, task_input))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => Err(PipelineError::from_cause(
                    inner.identity(),
                    panic_failure(payload.as_ref()),
                    kept,
                    task_started.elapsed(),
                )),
            }
        });

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => result.map_err(|err| err.with_prefix(self.identity.clone())),
                Err(join_err) => {
                    tracing::warn!(timeout = %self.identity, error = %join_err, "inner task did not complete");
                    Err(PipelineError::from_cause(
                        self.identity.clone(),
                        ContextError::Canceled,
                        input,
                        started.elapsed(),
                    ))
                }
            },
            _ = sleep_until(deadline) => {
                canceller.cancel();
                Err(PipelineError::from_context(
                    self.identity.clone(),
                    ContextError::DeadlineExceeded,
                    input,
                    started.elapsed(),
                ))
            }
            ctx_err = ctx.done() => {
                canceller.cancel();
                Err(PipelineError::from_context(
                    self.identity.clone(),
                    ctx_err,
                    input,
                    started.elapsed(),
                ))
            }
        }
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Timeout<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = self.run(&ctx, input, started).await;
        emit(
            &self.sink,
            Kind::Timeout,
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
            Kind::Timeout,
            self.identity.clone(),
            vec![self.inner.identity()],
        )
    }

    fn close(&self) -> anyhow::Result<()> {
        self.inner.close()
    }
}
