// Transform adapter - pure payload mapping that never fails

use super::{box_user_fn, run_contained, UserFn};
use crate::chainable::{Chainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use std::future::Future;
use tokio::time::Instant;

/// Wraps `(Context, T) -> T`: a mapping that cannot fail
///
/// The only failure a transform can produce is a contained panic from the
/// user function. Transforms do not inspect cancellation themselves;
/// composing connectors handle propagation.
pub struct Transform<T> {
    identity: Identity,
    f: UserFn<T, T>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Transform<T> {
    pub fn new<F, Fut>(identity: impl Into<Identity>, f: F) -> Self
    where
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
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
impl<T: Payload> Chainable<T> for Transform<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = match run_contained((self.f)(ctx, input.clone())).await {
            Ok(out) => Ok(out),
            Err(failure) => Err(PipelineError::from_cause(
                self.identity.clone(),
                failure,
                input,
                started.elapsed(),
            )),
        };
        emit(
            &self.sink,
            Kind::Transform,
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
        Schema::leaf(Kind::Transform, self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Failure;

    #[tokio::test]
    async fn test_transform_maps_payload() {
        let double = Transform::new("double", |_ctx, n: i64| async move { n * 2 });
        let out = double.process(Context::background(), 21).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_panic_becomes_structured_error() {
        let bad = Transform::new("explode", |_ctx, _n: i64| async move {
            panic!("lookup at 0x7ffd4010 failed");
        });
        let err = bad.process(Context::background(), 5).await.unwrap_err();

        assert_eq!(err.path().len(), 1);
        assert_eq!(err.path()[0].name, "explode");
        assert_eq!(*err.input_data(), 5);
        match err.cause().downcast_ref::<Failure>() {
            Some(Failure::Panic(msg)) => {
                assert!(msg.contains("0x***"), "pointer not redacted: {msg}");
                assert!(msg.chars().count() <= 200);
            }
            other => panic!("expected Panic, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_schema_is_leaf() {
        let t = Transform::new("noop", |_ctx, n: u8| async move { n });
        let schema = t.schema();
        assert_eq!(schema.kind, Kind::Transform);
        assert!(schema.children.is_empty());
    }
}
