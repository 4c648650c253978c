// Switch connector - routing by a computed key

use crate::adapters::call_contained;
use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::{Failure, PipelineError};
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use tokio::time::Instant;

/// Routes each payload to the chainable registered for its key
///
/// The key function is a synchronous decision over the payload. A key with
/// no registered route is a [`Failure::RouteNotFound`] error. The route
/// table is mutable at runtime; `process` snapshots the matched route under
/// the shared lock and releases it before delegating.
pub struct Switch<T, K> {
    identity: Identity,
    key_fn: Arc<dyn Fn(&Context, &T) -> K + Send + Sync>,
    routes: RwLock<HashMap<K, DynChainable<T>>>,
    sink: Option<SharedSink>,
}

impl<T, K> Switch<T, K>
where
    T: Payload,
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new<F>(identity: impl Into<Identity>, key_fn: F) -> Self
    where
        F: Fn(&Context, &T) -> K + Send + Sync + 'static,
    {
        Self {
            identity: identity.into(),
            key_fn: Arc::new(key_fn),
            routes: RwLock::new(HashMap::new()),
            sink: None,
        }
    }

    /// Attach an observability sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register (or overwrite) the route for `key`, chainable for setup code
    pub fn add_route(&self, key: K, chainable: DynChainable<T>) -> &Self {
        self.routes.write().unwrap().insert(key, chainable);
        self
    }

    /// Remove the route for `key`, returning it if present
    pub fn remove_route(&self, key: &K) -> Option<DynChainable<T>> {
        self.routes.write().unwrap().remove(key)
    }

    /// Whether a route exists for `key`
    pub fn has_route(&self, key: &K) -> bool {
        self.routes.read().unwrap().contains_key(key)
    }

    /// The registered route keys, in no particular order
    pub fn routes(&self) -> Vec<K> {
        self.routes.read().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl<T, K> Chainable<T> for Switch<T, K>
where
    T: Payload,
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let result = match call_contained(|| (self.key_fn)(&ctx, &input)) {
            Ok(key) => {
                let route = self.routes.read().unwrap().get(&key).cloned();
                match route {
                    Some(inner) => inner
                        .process(ctx, input)
                        .await
                        .map_err(|err| err.with_prefix(self.identity.clone())),
                    None => Err(PipelineError::from_cause(
                        self.identity.clone(),
                        Failure::RouteNotFound(format!("{key:?}")),
                        input,
                        started.elapsed(),
                    )),
                }
            }
            Err(failure) => Err(PipelineError::from_cause(
                self.identity.clone(),
                failure,
                input,
                started.elapsed(),
            )),
        };
        emit(
            &self.sink,
            Kind::Switch,
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
        let children = self
            .routes
            .read()
            .unwrap()
            .values()
            .map(|c| c.identity())
            .collect();
        Schema::composite(Kind::Switch, self.identity.clone(), children)
    }

    fn close(&self) -> anyhow::Result<()> {
        for route in self.routes.read().unwrap().values() {
            if let Err(e) = route.close() {
                tracing::warn!(route = %route.identity(), error = %e, "route close failed");
            }
        }
        Ok(())
    }
}
