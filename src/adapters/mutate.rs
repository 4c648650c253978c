// Mutate adapter - conditional transformation

use super::{box_user_fn, call_contained, run_contained, UserFn};
use crate::chainable::{Chainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Synchronous predicate deciding whether the mutation applies
pub(crate) type Condition<T> = Arc<dyn Fn(&Context, &T) -> bool + Send + Sync>;

/// Applies a transformation only when a condition holds
///
/// When the condition is false the input passes through untouched. The
/// adapter itself introduces no failures; the only errors it can produce are
/// contained panics from the user's condition or mutation.
pub struct Mutate<T> {
    identity: Identity,
    apply_fn: UserFn<T, T>,
    cond_fn: Condition<T>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Mutate<T> {
    pub fn new<F, Fut, C>(identity: impl Into<Identity>, apply_fn: F, cond_fn: C) -> Self
    where
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        C: Fn(&Context, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            identity: identity.into(),
            apply_fn: box_user_fn(apply_fn),
            cond_fn: Arc::new(cond_fn),
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
impl<T: Payload> Chainable<T> for Mutate<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = match call_contained(|| (self.cond_fn)(&ctx, &input)) {
            Ok(false) => Ok(input),
            Ok(true) => match run_contained((self.apply_fn)(ctx, input.clone())).await {
                Ok(out) => Ok(out),
                Err(failure) => Err(PipelineError::from_cause(
                    self.identity.clone(),
                    failure,
                    input,
                    started.elapsed(),
                )),
            },
            Err(failure) => Err(PipelineError::from_cause(
                self.identity.clone(),
                failure,
                input,
                started.elapsed(),
            )),
        };
        emit(
            &self.sink,
            Kind::Mutate,
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
        Schema::leaf(Kind::Mutate, self.identity.clone())
    }
}
