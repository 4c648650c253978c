// The uniform component contract
//
// Everything in the runtime - leaf processors, structural connectors,
// resilience wrappers, test doubles - implements `Chainable<T>`. Because
// connectors hold children as `DynChainable<T>`, any composition is itself a
// chainable and the whole algebra closes over one trait.

use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Schema};
use async_trait::async_trait;
use std::sync::Arc;

/// Payload capability: independently clonable and shareable across tasks
///
/// `Clone` is the deep-copy capability fan-out connectors rely on: a
/// memberwise copy is independent unless the payload deliberately embeds
/// shared-reference semantics (an `Arc`, say). The runtime also clones the
/// input to capture it in [`PipelineError`] when a subtree fails.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}

/// Outcome of one `process` call
pub type ProcessResult<T> = Result<T, PipelineError<T>>;

/// A pipeline component: leaf processor or composing connector
///
/// The contract is uniform: take a context and a payload, return the payload
/// (possibly transformed) or a structured error whose path starts with this
/// component's identity.
#[async_trait]
pub trait Chainable<T: Payload>: Send + Sync {
    /// Run the component
    ///
    /// Implementations observe `ctx` cooperatively: sequential connectors
    /// check it between children, suspended waits race against
    /// `ctx.done()`.
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T>;

    /// Stable identity used in error paths and logging
    fn identity(&self) -> Identity;

    /// Introspection schema (kind tag plus children for composites)
    fn schema(&self) -> Schema;

    /// Release internal resources
    ///
    /// Default no-op; stateful components override when they hold something
    /// worth releasing.
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Shared handle to any chainable, the form connectors store children in
pub type DynChainable<T> = Arc<dyn Chainable<T>>;
