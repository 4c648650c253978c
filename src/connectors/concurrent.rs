// Concurrent connector - side-effect fan-out over cloned inputs

use super::spawn_branch;
use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Fans a cloned input to every child in parallel; the result is always the
/// ORIGINAL input
///
/// Children run for their side effects. Each gets an independent clone, so
/// branch mutations cannot tear shared state. All children complete before
/// the call returns; if any failed, the first failure by completion order
/// propagates with this connector's identity prepended.
pub struct Concurrent<T> {
    identity: Identity,
    children: Vec<DynChainable<T>>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Concurrent<T> {
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
            // Done before any child starts
            return Err(PipelineError::from_context(
                self.identity.clone(),
                ctx_err,
                input.clone(),
                started.elapsed(),
            ));
        }

        let mut set = JoinSet::new();
        for child in &self.children {
            // Children start in registration order; completion order is free
            spawn_branch(&mut set, child, ctx, input);
        }

        let mut first_err: Option<PipelineError<T>> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Err(join_err) => {
                    // Branches are contained; a join error here means the
                    // task was aborted externally
                    tracing::warn!(
                        concurrent = %self.identity,
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
        match first_err {
            Some(err) => Err(err.with_prefix(self.identity.clone())),
            None => Ok(input.clone()),
        }
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Concurrent<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = self.run(&ctx, &input, started).await;
        emit(
            &self.sink,
            Kind::Concurrent,
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
        Schema::composite(Kind::Concurrent, self.identity.clone(), children)
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
