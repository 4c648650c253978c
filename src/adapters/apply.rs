// Apply adapter - fallible payload mapping

use super::{box_user_fn, run_contained, UserFn};
use crate::chainable::{Chainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use std::future::Future;
use tokio::time::Instant;

/// Wraps `(Context, T) -> anyhow::Result<T>`: validation and fallible work
pub struct Apply<T> {
    identity: Identity,
    f: UserFn<T, anyhow::Result<T>>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Apply<T> {
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
impl<T: Payload> Chainable<T> for Apply<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = match run_contained((self.f)(ctx, input.clone())).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(user_err)) => Err(PipelineError::from_anyhow(
                self.identity.clone(),
                user_err,
                input,
                started.elapsed(),
            )),
            Err(failure) => Err(PipelineError::from_cause(
                self.identity.clone(),
                failure,
                input,
                started.elapsed(),
            )),
        };
        emit(
            &self.sink,
            Kind::Apply,
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
        Schema::leaf(Kind::Apply, self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test]
    async fn test_apply_success() {
        let parse = Apply::new("parse", |_ctx, s: String| async move {
            s.trim().parse::<i64>().map_err(|e| anyhow!(e))
        });
        let out = parse
            .process(Context::background(), " 42 ".to_string())
            .await
            .unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_apply_error_wraps_cause_and_input() {
        let reject = Apply::new("reject", |_ctx, _n: u32| async move {
            Err(anyhow!("value out of range"))
        });
        let err = reject.process(Context::background(), 9).await.unwrap_err();

        assert_eq!(err.path()[0].name, "reject");
        assert_eq!(*err.input_data(), 9);
        assert!(!err.is_timeout());
        assert!(!err.is_canceled());
        assert!(err.to_string().contains("value out of range"));
    }

    #[tokio::test]
    async fn test_apply_panic_contained() {
        let bad = Apply::new("div", |_ctx, n: u32| async move { Ok(100 / n) });
        let err = bad.process(Context::background(), 0).await.unwrap_err();
        assert_eq!(err.path()[0].name, "div");
        assert_eq!(*err.input_data(), 0);
    }
}
