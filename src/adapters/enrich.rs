// Enrich adapter - best-effort augmentation

use super::{box_user_fn, run_contained, UserFn};
use crate::chainable::{Chainable, Payload, ProcessResult};
use crate::context::Context;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, Outcome, SharedSink};
use async_trait::async_trait;
use std::future::Future;
use tokio::time::Instant;

/// Wraps `(Context, T) -> anyhow::Result<T>` with best-effort semantics
///
/// A failing enrichment is not a pipeline failure: the original input flows
/// on and the failure is logged. Use for optional augmentation - geo lookup,
/// cache warm data, anything the pipeline can live without.
pub struct Enrich<T> {
    identity: Identity,
    f: UserFn<T, anyhow::Result<T>>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Enrich<T> {
    pub fn new<F, Fut>(identity: impl Into<Identity>, f: F) -> Self
    where
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            identity: identity.into(),
            f: box_user_fn(f),
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
impl<T: Payload> Chainable<T> for Enrich<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let (out, outcome) = match run_contained((self.f)(ctx, input.clone())).await {
            Ok(Ok(enriched)) => (enriched, Outcome::Ok),
            Ok(Err(user_err)) => {
                tracing::debug!(
                    enricher = %self.identity,
                    error = %user_err,
                    "enrichment failed, passing original input through"
                );
                (input, Outcome::Failed)
            }
            Err(failure) => {
                tracing::warn!(
                    enricher = %self.identity,
                    error = %failure,
                    "enrichment panicked, passing original input through"
                );
                (input, Outcome::Failed)
            }
        };
        emit(
            &self.sink,
            Kind::Enrich,
            &self.identity,
            started.elapsed(),
            outcome,
        );
        Ok(out)
    }

    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    fn schema(&self) -> Schema {
        Schema::leaf(Kind::Enrich, self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test]
    async fn test_enrich_applies_on_success() {
        let label = Enrich::new("label", |_ctx, s: String| async move {
            Ok(format!("{s} [checked]"))
        });
        let out = label
            .process(Context::background(), "row".to_string())
            .await
            .unwrap();
        assert_eq!(out, "row [checked]");
    }

    #[tokio::test]
    async fn test_enrich_failure_returns_original_without_error() {
        let flaky = Enrich::new("geo", |_ctx, _s: String| async move {
            Err(anyhow!("lookup service down"))
        });
        let out = flaky
            .process(Context::background(), "row".to_string())
            .await
            .unwrap();
        assert_eq!(out, "row");
    }

    #[tokio::test]
    async fn test_enrich_panic_is_swallowed() {
        let bad = Enrich::new("panicky", |_ctx, _s: String| async move {
            panic!("enrichment source corrupt");
        });
        let out = bad
            .process(Context::background(), "row".to_string())
            .await
            .unwrap();
        assert_eq!(out, "row");
    }
}
