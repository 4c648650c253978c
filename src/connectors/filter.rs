// Filter connector - predicate-gated delegation

use crate::adapters::call_contained;
use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

/// Runs its inner chainable only when a predicate holds
///
/// When the predicate is false the payload passes through untouched - the
/// inner chainable is never consulted.
pub struct Filter<T> {
    identity: Identity,
    predicate: Arc<dyn Fn(&Context, &T) -> bool + Send + Sync>,
    inner: DynChainable<T>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Filter<T> {
    pub fn new<P>(identity: impl Into<Identity>, predicate: P, inner: DynChainable<T>) -> Self
    where
        P: Fn(&Context, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            identity: identity.into(),
            predicate: Arc::new(predicate),
            inner,
            sink: None,
        }
    }

    /// Attach an observability sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Filter<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = match call_contained(|| (self.predicate)(&ctx, &input)) {
            Ok(false) => Ok(input),
            Ok(true) => self
                .inner
                .process(ctx, input)
                .await
                .map_err(|err| err.with_prefix(self.identity.clone())),
            Err(failure) => Err(PipelineError::from_cause(
                self.identity.clone(),
                failure,
                input,
                started.elapsed(),
            )),
        };
        emit(
            &self.sink,
            Kind::Filter,
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
            Kind::Filter,
            self.identity.clone(),
            vec![self.inner.identity()],
        )
    }

    fn close(&self) -> anyhow::Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Transform;

    fn doubler() -> DynChainable<i64> {
        Arc::new(Transform::new("double", |_ctx, n: i64| async move { n * 2 }))
    }

    #[tokio::test]
    async fn test_filter_delegates_when_predicate_true() {
        let f = Filter::new("evens-only", |_ctx, n: &i64| n % 2 == 0, doubler());
        let out = f.process(Context::background(), 4).await.unwrap();
        assert_eq!(out, 8);
    }

    #[tokio::test]
    async fn test_filter_passes_through_when_predicate_false() {
        let f = Filter::new("evens-only", |_ctx, n: &i64| n % 2 == 0, doubler());
        let out = f.process(Context::background(), 3).await.unwrap();
        assert_eq!(out, 3);
    }

    #[tokio::test]
    async fn test_inner_error_carries_filter_prefix() {
        let inner: DynChainable<i64> = Arc::new(crate::adapters::Apply::new(
            "reject",
            |_ctx, _n: i64| async move { Err(anyhow::anyhow!("nope")) },
        ));
        let f = Filter::new("gate", |_ctx, _n: &i64| true, inner);
        let err = f.process(Context::background(), 1).await.unwrap_err();
        let names: Vec<&str> = err.path().iter().map(|id| id.name.as_str()).collect();
        assert_eq!(names, vec!["gate", "reject"]);
    }
}
