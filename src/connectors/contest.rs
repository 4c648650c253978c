// Contest connector - first success that satisfies a condition wins

use super::spawn_branch;
use crate::adapters::call_contained;
use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::{Failure, PipelineError};
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Like [`super::Race`], but a success must also satisfy a condition to win
///
/// Non-qualifying successes are discarded as if the branch produced nothing.
/// When the children exhaust without a qualifying success the contest fails
/// with [`Failure::NoWinner`] - unless the caller's context is done, in
/// which case the cancellation propagates instead.
pub struct Contest<T> {
    identity: Identity,
    condition: Arc<dyn Fn(&Context, &T) -> bool + Send + Sync>,
    children: Vec<DynChainable<T>>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Contest<T> {
    pub fn new<C>(
        identity: impl Into<Identity>,
        condition: C,
        children: impl IntoIterator<Item = DynChainable<T>>,
    ) -> Self
    where
        C: Fn(&Context, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            identity: identity.into(),
            condition: Arc::new(condition),
            children: children.into_iter().collect(),
            sink: None,
        }
    }

    /// Attach an observability sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn run(&self, ctx: &Context, input: &T, started: Instant) -> ProcessResult<T> {
        if let Some(ctx_err) = ctx.error() {
            return Err(PipelineError::from_context(
                self.identity.clone(),
                ctx_err,
                input.clone(),
                started.elapsed(),
            ));
        }

        let (contest_ctx, canceller) = ctx.with_cancel();
        let mut set = JoinSet::new();
        for child in &self.children {
            spawn_branch(&mut set, child, &contest_ctx, input);
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(out)) => match call_contained(|| (self.condition)(ctx, &out)) {
                    Ok(true) => {
                        canceller.cancel();
                        set.detach_all();
                        return Ok(out);
                    }
                    Ok(false) => {
                        tracing::debug!(
                            contest = %self.identity,
                            "branch succeeded but did not qualify"
                        );
                    }
                    Err(failure) => {
                        // A panicking condition disqualifies the result
                        tracing::warn!(
                            contest = %self.identity,
                            error = %failure,
                            "condition panicked, discarding branch result"
                        );
                    }
                },
                Ok(Err(err)) => {
                    tracing::debug!(
                        contest = %self.identity,
                        error = %err,
                        "branch failed"
                    );
                }
                Err(join_err) => {
                    tracing::warn!(
                        contest = %self.identity,
                        error = %join_err,
                        "branch task did not complete"
                    );
                }
            }
        }

        if let Some(ctx_err) = ctx.error() {
            return Err(PipelineError::from_context(
                self.identity.clone(),
                ctx_err,
                input.clone(),
                started.elapsed(),
            ));
        }
        Err(PipelineError::from_cause(
            self.identity.clone(),
            Failure::NoWinner,
            input.clone(),
            started.elapsed(),
        ))
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Contest<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = self.run(&ctx, &input, started).await;
        emit(
            &self.sink,
            Kind::Contest,
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
        let children = self.children.iter().map(|c| c.identity()).collect();
        Schema::composite(Kind::Contest, self.identity.clone(), children)
    }

    fn close(&self) -> anyhow::Result<()> {
        for child in self.children.iter().rev() {
            if let Err(e) = child.close() {
                tracing::warn!(child = %child.identity(), error = %e, "child close failed");
            }
        }
        Ok(())
    }
}
