// Handle connector - error observation without recovery
//
// Wraps a processor and an error handler. The handler is an observer: it
// runs on failure, its output is discarded, its own failures are swallowed
// and logged as secondary. The original error always propagates.

use crate::adapters::run_contained;
use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use std::sync::RwLock;
use tokio::time::Instant;

/// Observes failures of its processor through an error-handler chainable
///
/// Both slots are swappable at runtime. Each `process` call reads both
/// references exactly once at entry, so a concurrent `set_processor` or
/// `set_error_handler` affects only subsequent calls - there is no
/// swap-mid-flight race.
pub struct Handle<T> {
    identity: Identity,
    processor: RwLock<DynChainable<T>>,
    error_handler: RwLock<DynChainable<PipelineError<T>>>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Handle<T> {
    pub fn new(
        identity: impl Into<Identity>,
        processor: DynChainable<T>,
        error_handler: DynChainable<PipelineError<T>>,
    ) -> Self {
        Self {
            identity: identity.into(),
            processor: RwLock::new(processor),
            error_handler: RwLock::new(error_handler),
            sink: None,
        }
    }

    /// Attach an observability sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Swap the processor; in-flight calls keep their snapshot
    pub fn set_processor(&self, processor: DynChainable<T>) {
        *self.processor.write().unwrap() = processor;
    }

    /// Swap the error handler; in-flight calls keep their snapshot
    pub fn set_error_handler(&self, handler: DynChainable<PipelineError<T>>) {
        *self.error_handler.write().unwrap() = handler;
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Handle<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        // Read both slots once; the snapshot holds for the whole call
        let processor = self.processor.read().unwrap().clone();
        let handler = self.error_handler.read().unwrap().clone();

        let result = match processor.process(ctx.clone(), input).await {
            Ok(out) => Ok(out),
            Err(err) => {
                // The handler observes the error as the processor reported
                // it; its outcome never changes what propagates
                match run_contained(handler.process(ctx, err.clone())).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(secondary)) => {
                        tracing::warn!(
                            handle = %self.identity,
                            error = %secondary,
                            "error handler failed; original error still propagates"
                        );
                    }
                    Err(failure) => {
                        tracing::warn!(
                            handle = %self.identity,
                            error = %failure,
                            "error handler panicked; original error still propagates"
                        );
                    }
                }
                Err(err.with_prefix(self.identity.clone()))
            }
        };
        emit(
            &self.sink,
            Kind::Handle,
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
        let children = vec![
            self.processor.read().unwrap().identity(),
            self.error_handler.read().unwrap().identity(),
        ];
        Schema::composite(Kind::Handle, self.identity.clone(), children)
    }

    fn close(&self) -> anyhow::Result<()> {
        let processor = self.processor.read().unwrap().clone();
        let handler = self.error_handler.read().unwrap().clone();
        if let Err(e) = handler.close() {
            tracing::warn!(error = %e, "error handler close failed");
        }
        processor.close()
    }
}
