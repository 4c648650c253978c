// Leaf processor adapters
//
// Adapters wrap user functions into the uniform `Chainable<T>` contract:
//
// ```text
// user fn -> [Transform | Apply | Effect | Enrich | Mutate] -> Chainable<T>
// ```
//
// All of them run the user future under deferred recovery, so a panic in
// user code becomes a structured error instead of unwinding through the
// pipeline. User functions are async; predicates (Mutate's condition) are
// synchronous decisions.

use crate::context::Context;
use crate::error::Failure;
use crate::panics::panic_failure;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

mod apply;
mod effect;
mod enrich;
mod mutate;
mod transform;

pub use apply::Apply;
pub use effect::Effect;
pub use enrich::Enrich;
pub use mutate::Mutate;
pub use transform::Transform;

/// Boxed async user function, as stored by the adapters
pub(crate) type UserFn<T, O> = Arc<dyn Fn(Context, T) -> BoxFuture<'static, O> + Send + Sync>;

/// Box an async closure into the stored form
pub(crate) fn box_user_fn<T, O, F, Fut>(f: F) -> UserFn<T, O>
where
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = O> + Send + 'static,
{
    Arc::new(move |ctx, input| f(ctx, input).boxed())
}

/// Run a user future under deferred recovery
///
/// A panic becomes a sanitized [`Failure::Panic`] instead of unwinding.
pub(crate) async fn run_contained<O>(fut: BoxFuture<'_, O>) -> Result<O, Failure> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => Ok(value),
        Err(payload) => Err(panic_failure(payload.as_ref())),
    }
}

/// Run a synchronous user predicate under deferred recovery
pub(crate) fn call_contained<O>(f: impl FnOnce() -> O) -> Result<O, Failure> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => Err(panic_failure(payload.as_ref())),
    }
}
