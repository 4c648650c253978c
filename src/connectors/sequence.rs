// Sequence connector - ordered composition with a dynamic child list
//
// Children run strictly serially in registration order. The child list is
// guarded by a reader-writer lock: `process` takes a snapshot under the
// shared lock and releases it before executing anything, mutators take the
// exclusive lock. A mid-flight call therefore completes on the list it
// observed at entry, the next call sees the mutation, and no caller ever
// observes a half-applied edit.

use crate::chainable::{Chainable, DynChainable, Payload, ProcessResult};
use crate::context::Context;
use crate::error::PipelineError;
use crate::identity::{Identity, Kind, Schema};
use crate::observe::{emit, outcome_of, SharedSink};
use anyhow::bail;
use async_trait::async_trait;
use std::sync::RwLock;
use tokio::time::Instant;

/// Ordered composition of chainables
pub struct Sequence<T> {
    identity: Identity,
    children: RwLock<Vec<DynChainable<T>>>,
    sink: Option<SharedSink>,
}

impl<T: Payload> Sequence<T> {
    /// Create an empty sequence (a passthrough until children register)
    pub fn new(identity: impl Into<Identity>) -> Self {
        Self {
            identity: identity.into(),
            children: RwLock::new(Vec::new()),
            sink: None,
        }
    }

    /// Attach an observability sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Append children in order
    pub fn register(&self, children: impl IntoIterator<Item = DynChainable<T>>) {
        let mut guard = self.children.write().unwrap();
        guard.extend(children);
    }

    /// Insert a child at the front
    pub fn push_head(&self, child: DynChainable<T>) {
        self.children.write().unwrap().insert(0, child);
    }

    /// Append a child at the back
    pub fn push_tail(&self, child: DynChainable<T>) {
        self.children.write().unwrap().push(child);
    }

    /// Remove and return the first child
    pub fn pop_head(&self) -> Option<DynChainable<T>> {
        let mut guard = self.children.write().unwrap();
        if guard.is_empty() {
            None
        } else {
            Some(guard.remove(0))
        }
    }

    /// Remove and return the last child
    pub fn pop_tail(&self) -> Option<DynChainable<T>> {
        self.children.write().unwrap().pop()
    }

    /// Insert a child at position `index` (may equal the current length)
    pub fn insert_at(&self, index: usize, child: DynChainable<T>) -> anyhow::Result<()> {
        let mut guard = self.children.write().unwrap();
        if index > guard.len() {
            bail!("insert index {index} out of range for {} children", guard.len());
        }
        guard.insert(index, child);
        Ok(())
    }

    /// Remove and return the child at `index`
    pub fn remove_at(&self, index: usize) -> anyhow::Result<DynChainable<T>> {
        let mut guard = self.children.write().unwrap();
        if index >= guard.len() {
            bail!("remove index {index} out of range for {} children", guard.len());
        }
        Ok(guard.remove(index))
    }

    /// Remove and return the first child whose identity name matches
    pub fn remove(&self, name: &str) -> anyhow::Result<DynChainable<T>> {
        let mut guard = self.children.write().unwrap();
        match guard.iter().position(|c| c.identity().name == name) {
            Some(index) => Ok(guard.remove(index)),
            None => bail!("no child named {name:?}"),
        }
    }

    /// Replace the child at `index`, returning the old child
    pub fn replace_at(
        &self,
        index: usize,
        child: DynChainable<T>,
    ) -> anyhow::Result<DynChainable<T>> {
        let mut guard = self.children.write().unwrap();
        if index >= guard.len() {
            bail!("replace index {index} out of range for {} children", guard.len());
        }
        Ok(std::mem::replace(&mut guard[index], child))
    }

    /// Replace the first child whose identity name matches, returning it
    pub fn replace(&self, name: &str, child: DynChainable<T>) -> anyhow::Result<DynChainable<T>> {
        let mut guard = self.children.write().unwrap();
        match guard.iter().position(|c| c.identity().name == name) {
            Some(index) => Ok(std::mem::replace(&mut guard[index], child)),
            None => bail!("no child named {name:?}"),
        }
    }

    /// Insert a child directly after the first child named `name`
    pub fn after(&self, name: &str, child: DynChainable<T>) -> anyhow::Result<()> {
        let mut guard = self.children.write().unwrap();
        match guard.iter().position(|c| c.identity().name == name) {
            Some(index) => {
                guard.insert(index + 1, child);
                Ok(())
            }
            None => bail!("no child named {name:?}"),
        }
    }

    /// Insert a child directly before the first child named `name`
    pub fn before(&self, name: &str, child: DynChainable<T>) -> anyhow::Result<()> {
        let mut guard = self.children.write().unwrap();
        match guard.iter().position(|c| c.identity().name == name) {
            Some(index) => {
                guard.insert(index, child);
                Ok(())
            }
            None => bail!("no child named {name:?}"),
        }
    }

    /// Move the child at `index` to the front
    pub fn move_to_head(&self, index: usize) -> anyhow::Result<()> {
        let mut guard = self.children.write().unwrap();
        if index >= guard.len() {
            bail!("move index {index} out of range for {} children", guard.len());
        }
        let child = guard.remove(index);
        guard.insert(0, child);
        Ok(())
    }

    /// Move the child at `index` to the back
    pub fn move_to_tail(&self, index: usize) -> anyhow::Result<()> {
        let mut guard = self.children.write().unwrap();
        if index >= guard.len() {
            bail!("move index {index} out of range for {} children", guard.len());
        }
        let child = guard.remove(index);
        guard.push(child);
        Ok(())
    }

    /// Swap the children at `i` and `j`
    pub fn swap(&self, i: usize, j: usize) -> anyhow::Result<()> {
        let mut guard = self.children.write().unwrap();
        if i >= guard.len() || j >= guard.len() {
            bail!("swap indices ({i}, {j}) out of range for {} children", guard.len());
        }
        guard.swap(i, j);
        Ok(())
    }

    /// Reverse the child order
    pub fn reverse(&self) {
        self.children.write().unwrap().reverse();
    }

    /// Identities of the children, in order
    pub fn names(&self) -> Vec<Identity> {
        self.children
            .read()
            .unwrap()
            .iter()
            .map(|c| c.identity())
            .collect()
    }

    /// Number of children
    pub fn len(&self) -> usize {
        self.children.read().unwrap().len()
    }

    /// Whether the sequence has no children
    pub fn is_empty(&self) -> bool {
        self.children.read().unwrap().is_empty()
    }

    fn snapshot(&self) -> Vec<DynChainable<T>> {
        self.children.read().unwrap().clone()
    }

    async fn run_children(
        &self,
        ctx: &Context,
        input: T,
        children: &[DynChainable<T>],
        started: Instant,
    ) -> ProcessResult<T> {
        let original = input.clone();
        let mut cur = input;
        for child in children {
            if let Some(ctx_err) = ctx.error() {
                return Err(PipelineError::from_context(
                    self.identity.clone(),
                    ctx_err,
                    original,
                    started.elapsed(),
                ));
            }
            cur = child
                .process(ctx.clone(), cur)
                .await
                .map_err(|err| err.with_prefix(self.identity.clone()))?;
        }
        Ok(cur)
    }
}

#[async_trait]
impl<T: Payload> Chainable<T> for Sequence<T> {
    async fn process(&self, ctx: Context, input: T) -> ProcessResult<T> {
        let started = Instant::now();
        let children = self.snapshot();
        let result = self.run_children(&ctx, input, &children, started).await;
        emit(
            &self.sink,
            Kind::Sequence,
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
        Schema::composite(Kind::Sequence, self.identity.clone(), self.names())
    }

    fn close(&self) -> anyhow::Result<()> {
        // Close in reverse registration order - later children may depend on
        // earlier ones
        for child in self.snapshot().iter().rev() {
            if let Err(e) = child.close() {
                tracing::warn!(child = %child.identity(), error = %e, "child close failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Apply, Transform};
    use std::sync::Arc;
    use std::time::Duration;

    fn add(name: &str, delta: i64) -> DynChainable<i64> {
        Arc::new(Transform::new(name, move |_ctx, n: i64| async move {
            n + delta
        }))
    }

    fn failing(name: &str) -> DynChainable<i64> {
        Arc::new(Apply::new(name, |_ctx, _n: i64| async move {
            Err(anyhow::anyhow!("boom"))
        }))
    }

    #[tokio::test]
    async fn test_children_run_in_order() {
        let seq = Sequence::new("math");
        seq.register([
            Arc::new(Transform::new("double", |_ctx, n: i64| async move { n * 2 }))
                as DynChainable<i64>,
            add("plus-ten", 10),
            add("minus-five", -5),
        ]);

        let out = seq.process(Context::background(), 42).await.unwrap();
        assert_eq!(out, 89);
    }

    #[tokio::test]
    async fn test_empty_sequence_is_passthrough() {
        let seq: Sequence<i64> = Sequence::new("empty");
        let out = seq.process(Context::background(), 7).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_error_halts_and_prepends_identity() {
        let seq = Sequence::new("chain");
        seq.register([add("first", 1), failing("bad"), add("unreached", 100)]);

        let err = seq.process(Context::background(), 0).await.unwrap_err();
        let names: Vec<&str> = err.path().iter().map(|id| id.name.as_str()).collect();
        assert_eq!(names, vec!["chain", "bad"]);
        // The failing child saw the already-transformed value
        assert_eq!(*err.input_data(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_before_next_child() {
        let seq = Sequence::new("chain");
        seq.register([add("only", 1)]);

        let (ctx, canceller) = Context::background().with_cancel();
        canceller.cancel();

        let err = seq.process(ctx, 5).await.unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(err.path().len(), 1);
        assert_eq!(err.path()[0].name, "chain");
        assert_eq!(*err.input_data(), 5);
    }

    #[tokio::test]
    async fn test_mutation_api() {
        let seq = Sequence::new("pipeline");
        seq.register([add("a", 1), add("b", 2), add("c", 3)]);

        assert_eq!(seq.len(), 3);
        assert!(!seq.is_empty());

        seq.after("a", add("a2", 10)).unwrap();
        seq.before("c", add("pre-c", 20)).unwrap();
        let names: Vec<String> = seq.names().into_iter().map(|id| id.name).collect();
        assert_eq!(names, vec!["a", "a2", "b", "pre-c", "c"]);

        let removed = seq.remove("a2").unwrap();
        assert_eq!(removed.identity().name, "a2");

        seq.replace("b", add("b-new", 5)).unwrap();
        seq.swap(0, 1).unwrap();
        let names: Vec<String> = seq.names().into_iter().map(|id| id.name).collect();
        assert_eq!(names, vec!["b-new", "a", "pre-c", "c"]);

        seq.move_to_tail(0).unwrap();
        seq.move_to_head(2).unwrap();
        seq.reverse();
        assert_eq!(seq.len(), 4);

        let head = seq.pop_head().unwrap();
        let tail = seq.pop_tail().unwrap();
        assert_eq!(seq.len(), 2);
        drop((head, tail));

        assert!(seq.remove("missing").is_err());
        assert!(seq.insert_at(99, add("x", 0)).is_err());
        assert!(seq.swap(0, 9).is_err());
    }

    #[tokio::test]
    async fn test_in_flight_call_uses_entry_snapshot() {
        let seq = Arc::new(Sequence::new("live"));
        seq.register([
            Arc::new(Transform::new("slow", |_ctx, n: i64| async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                n + 1
            })) as DynChainable<i64>,
            add("tail", 10),
        ]);

        let seq_for_call = seq.clone();
        let call = tokio::spawn(async move {
            seq_for_call.process(Context::background(), 0).await
        });

        // Mutate while the first child sleeps: the in-flight call must not
        // see the new child
        tokio::time::sleep(Duration::from_millis(5)).await;
        seq.push_tail(add("added-later", 1000));

        let out = call.await.unwrap().unwrap();
        assert_eq!(out, 11);

        // The next call reflects the mutation
        let out = seq.process(Context::background(), 0).await.unwrap();
        assert_eq!(out, 1011);
    }

    #[tokio::test]
    async fn test_schema_lists_children() {
        let seq = Sequence::new("shape");
        seq.register([add("x", 1), add("y", 2)]);
        let schema = seq.schema();
        assert_eq!(schema.kind, Kind::Sequence);
        assert_eq!(schema.children.len(), 2);
        assert_eq!(schema.children[0].name, "x");
    }
}
