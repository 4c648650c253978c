// Race connector - first success wins, losers are cancelled

use super::spawn_branch;
use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::{Failure, PipelineError};
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Runs all children on cloned inputs; the first SUCCESS is the result
///
/// Losing branches have their derived context cancelled and their outcomes
/// discarded. If every child fails, the last failure by completion order
/// propagates. An empty race can never produce a winner and fails with
/// [`Failure::NoWinner`].
pub struct Race<T> {
    identity: Identity,
    children: Vec<DynChainable<T>>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Race<T> {
    pub fn new(
        identity: impl Into<Identity>,
        children: impl IntoIterator<Item = DynChainable<T>>,
    ) -> Self {
        Self {
            identity: identity.into(),
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

        let (race_ctx, canceller) = ctx.with_cancel();
        let mut set = JoinSet::new();
        for child in &self.children {
            spawn_branch(&mut set, child, &race_ctx, input);
        }

        let mut last_err: Option<PipelineError<T>> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(out)) => {
                    // Winner: cancel the rest, let them wind down on their own
                    canceller.cancel();
                    set.detach_all();
                    return Ok(out);
                }
                Ok(Err(err)) => last_err = Some(err),
                Err(join_err) => {
                    tracing::warn!(
                        race = %self.identity,
                        error = %join_err,
                        "branch task did not complete"
                    );
                }
            }
        }

        match last_err {
            Some(err) => Err(err.with_prefix(self.identity.clone())),
            None => Err(PipelineError::from_cause(
                self.identity.clone(),
                Failure::NoWinner,
                input.clone(),
                started.elapsed(),
            )),
        }
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Race<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = self.run(&ctx, &input, started).await;
        emit(
            &self.sink,
            Kind::Race,
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
        Schema::composite(Kind::Race, self.identity.clone(), children)
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
