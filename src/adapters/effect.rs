// Effect adapter - side effects that pass the payload through untouched

use super::{box_user_fn, run_contained, UserFn};
use crate::chainable::{Chainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use std::future::Future;
use tokio::time::Instant;

/// Wraps `(Context, T) -> anyhow::Result<()>`: observe, never transform
///
/// The effect receives its own clone of the payload, so it cannot mutate
/// what flows downstream. On success the original input is returned.
pub struct Effect<T> {
    identity: Identity,
    f: UserFn<T, anyhow::Result<()>>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Effect<T> {
    pub fn new<F, Fut>(identity: impl Into<Identity>, f: F) -> Self
    where
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
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
impl<T: Payload> Chainable<T> for Effect<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = match run_contained((self.f)(ctx, input.clone())).await {
            Ok(Ok(())) => Ok(input),
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
            Kind::Effect,
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
        Schema::leaf(Kind::Effect, self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_effect_returns_original_input() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_in_fn = seen.clone();
        let audit = Effect::new("audit", move |_ctx, n: u32| {
            let seen = seen_in_fn.clone();
            async move {
                seen.store(n, Ordering::SeqCst);
                Ok(())
            }
        });

        let out = audit.process(Context::background(), 17).await.unwrap();
        assert_eq!(out, 17);
        assert_eq!(seen.load(Ordering::SeqCst), 17);
    }

    #[tokio::test]
    async fn test_effect_error_propagates() {
        let flaky = Effect::new("notify", |_ctx, _n: u32| async move {
            Err(anyhow!("webhook unreachable"))
        });
        let err = flaky.process(Context::background(), 3).await.unwrap_err();
        assert_eq!(err.path()[0].name, "notify");
        assert_eq!(*err.input_data(), 3);
    }

    #[tokio::test]
    async fn test_effect_gets_its_own_clone() {
        // The effect mutates its copy; the pipeline value is unaffected
        let shuffle = Effect::new("shuffle", |_ctx, mut v: Vec<u8>| async move {
            v.reverse();
            Ok(())
        });
        let out = shuffle
            .process(Context::background(), vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }
}
