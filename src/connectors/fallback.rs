// Fallback connector - ordered alternatives, first success wins

use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use tokio::time::Instant;

/// Attempts each child in order with the same input
///
/// The first success is the result. When every child fails, the LAST
/// child's error propagates (with this connector's identity prepended).
/// Cancellation short-circuits: no child runs after the context is done.
pub struct Fallback<T> {
    identity: Identity,
    children: Vec<DynChainable<T>>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Fallback<T> {
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

    async fn run(&self, ctx: &Context, input: T, started: Instant) -> ProcessResult<T> {
        let mut last_err: Option<PipelineError<T>> = None;
        for child in &self.children {
            if let Some(ctx_err) = ctx.error() {
                return Err(PipelineError::from_context(
                    self.identity.clone(),
                    ctx_err,
                    input,
                    started.elapsed(),
                ));
            }
            match child.process(ctx.clone(), input.clone()).await {
                Ok(out) => return Ok(out),
                Err(err) => {
                    tracing::debug!(
                        fallback = %self.identity,
                        child = %child.identity(),
                        error = %err,
                        "fallback child failed, trying next"
                    );
                    last_err = Some(err);
                }
            }
        }
        match last_err {
            Some(err) => Err(err.with_prefix(self.identity.clone())),
            // No children registered: nothing to attempt, nothing failed
            None => Ok(input),
        }
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Fallback<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = self.run(&ctx, input, started).await;
        emit(
            &self.sink,
            Kind::Fallback,
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
        Schema::composite(Kind::Fallback, self.identity.clone(), children)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Apply, Transform};
    use std::sync::Arc;

    fn failing(name: &str, msg: &'static str) -> DynChainable<i64> {
        Arc::new(Apply::new(name, move |_ctx, _n: i64| async move {
            Err(anyhow::anyhow!(msg))
        }))
    }

    fn doubler() -> DynChainable<i64> {
        Arc::new(Transform::new("double", |_ctx, n: i64| async move { n * 2 }))
    }

    #[tokio::test]
    async fn test_secondary_rescues_primary_failure() {
        let fb = Fallback::new("fb", [failing("primary", "x"), doubler()]);
        let out = fb.process(Context::background(), 42).await.unwrap();
        assert_eq!(out, 84);
    }

    #[tokio::test]
    async fn test_first_success_stops_the_walk() {
        let fb = Fallback::new("fb", [doubler(), failing("never-tried", "x")]);
        let out = fb.process(Context::background(), 10).await.unwrap();
        assert_eq!(out, 20);
    }

    #[tokio::test]
    async fn test_all_failures_return_last_error() {
        let fb = Fallback::new(
            "fb",
            [failing("first", "first boom"), failing("second", "second boom")],
        );
        let err = fb.process(Context::background(), 1).await.unwrap_err();
        assert!(err.to_string().contains("second boom"));
        let names: Vec<&str> = err.path().iter().map(|id| id.name.as_str()).collect();
        assert_eq!(names, vec!["fb", "second"]);
    }

    #[tokio::test]
    async fn test_each_child_sees_the_original_input() {
        let fb = Fallback::new(
            "fb",
            [
                failing("p", "x"),
                Arc::new(Transform::new("add-one", |_ctx, n: i64| async move { n + 1 }))
                    as DynChainable<i64>,
            ],
        );
        let out = fb.process(Context::background(), 100).await.unwrap();
        assert_eq!(out, 101);
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits() {
        let fb = Fallback::new("fb", [failing("p", "x"), doubler()]);
        let (ctx, canceller) = Context::background().with_cancel();
        canceller.cancel();

        let err = fb.process(ctx, 1).await.unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(err.path()[0].name, "fb");
    }
}
