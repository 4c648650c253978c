// pipz - in-process, type-parametric data-pipeline runtime
//
// A single strongly-typed payload flows through a composition of processors
// (leaf computations) and connectors (structural combinators). Everything
// implements one contract, so any composition is itself a component.
//
// Architecture:
// - Adapters: wrap user functions (Transform, Apply, Effect, Enrich, Mutate)
// - Sequential connectors: Sequence, Filter, Switch, Fallback, Handle
// - Concurrent connectors: Concurrent, Race, Contest (clone-per-branch)
// - Resilience connectors: Timeout, Retry, Backoff, CircuitBreaker,
//   RateLimiter
// - Errors carry a root-to-leaf identity path, timestamps, and
//   timeout/canceled flags; panics in user code become structured errors
//   with sanitized messages
//
// ```text
// caller ──> Chainable::process(ctx, input) ──> (output | PipelineError)
//                      │
//        ┌─────────────┼──────────────┐
//        v             v              v
//    adapters     connectors     resilience
//   (user fns)   (composition)  (stateful gates)
// ```

mod adapters;
mod chainable;
mod connectors;
mod context;
mod error;
mod identity;
mod observe;
mod panics;
pub mod testing;

pub use adapters::{Apply, Effect, Enrich, Mutate, Transform};
pub use chainable::{Chainable, DynChainable, Payload, ProcessResult};
pub use connectors::{
    Backoff, CircuitBreaker, CircuitState, Concurrent, Contest, Fallback, Filter, Handle, Race,
    RateLimiter, RateLimiterMode, Retry, Sequence, Switch, Timeout,
};
pub use context::{Canceller, Context, ContextError};
pub use error::{Failure, PipelineError};
pub use identity::{Identity, Kind, Schema};
pub use observe::{EventSink, Outcome, SharedSink, SinkEvent};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn failing(name: &str, msg: &'static str) -> DynChainable<i64> {
        Arc::new(Apply::new(name, move |_ctx, _n: i64| async move {
            Err(anyhow::anyhow!(msg))
        }))
    }

    #[tokio::test]
    async fn test_error_path_spans_the_whole_composition() {
        let bounded: DynChainable<i64> = Arc::new(Timeout::new(
            "bound",
            failing("store", "disk full"),
            Duration::from_secs(5),
        ));
        let retried: DynChainable<i64> = Arc::new(Retry::new("retry", bounded, 2));
        let pipeline = Sequence::new("pipeline");
        pipeline.register([
            Arc::new(Transform::new("stamp", |_ctx, n: i64| async move { n + 1 }))
                as DynChainable<i64>,
            retried,
        ]);

        let err = pipeline.process(Context::background(), 0).await.unwrap_err();
        let names: Vec<&str> = err.path().iter().map(|id| id.name.as_str()).collect();
        assert_eq!(names, vec!["pipeline", "retry", "bound", "store"]);
        assert!(err.to_string().contains("disk full"));
        // The failing leaf saw the stamped value
        assert_eq!(*err.input_data(), 1);
    }

    #[tokio::test]
    async fn test_every_root_fails_with_its_own_identity_first() {
        let ctx = Context::background();
        let roots: Vec<DynChainable<i64>> = vec![
            failing("apply-root", "x"),
            Arc::new(Fallback::new("fallback-root", [failing("a", "x"), failing("b", "y")])),
            Arc::new(Race::new("race-root", [failing("a", "x")])),
            Arc::new(Retry::new("retry-root", failing("a", "x"), 2)),
            Arc::new(CircuitBreaker::new(
                "breaker-root",
                failing("a", "x"),
                3,
                Duration::from_secs(1),
            )),
        ];

        for root in roots {
            let err = root.process(ctx.clone(), 1).await.unwrap_err();
            assert!(!err.path().is_empty());
            assert_eq!(err.path()[0], root.identity(), "root {}", root.identity());
        }
    }

    #[tokio::test]
    async fn test_routed_pipeline_end_to_end() {
        // Orders below 100 ship directly; larger ones go through review
        // with a fallback quote
        let direct: DynChainable<i64> =
            Arc::new(Transform::new("direct", |_ctx, n: i64| async move { n + 1 }));
        let review: DynChainable<i64> = Arc::new(Fallback::new(
            "review",
            [
                failing("strict-review", "reviewer unavailable"),
                Arc::new(Transform::new("lenient-review", |_ctx, n: i64| async move {
                    n + 1000
                })) as DynChainable<i64>,
            ],
        ));

        let router = Switch::new("router", |_ctx, n: &i64| *n >= 100);
        router.add_route(false, direct).add_route(true, review);

        let pipeline = Sequence::new("orders");
        pipeline.register([
            Arc::new(Filter::new(
                "skip-zero",
                |_ctx, n: &i64| *n != 0,
                Arc::new(router) as DynChainable<i64>,
            )) as DynChainable<i64>,
        ]);

        let ctx = Context::background();
        assert_eq!(pipeline.process(ctx.clone(), 0).await.unwrap(), 0);
        assert_eq!(pipeline.process(ctx.clone(), 5).await.unwrap(), 6);
        assert_eq!(pipeline.process(ctx.clone(), 500).await.unwrap(), 1500);
    }

    #[tokio::test]
    async fn test_schema_introspection_serializes() {
        let seq = Sequence::new("etl");
        seq.register([
            Arc::new(Transform::new("parse", |_ctx, n: i64| async move { n }))
                as DynChainable<i64>,
            Arc::new(Transform::new("store", |_ctx, n: i64| async move { n }))
                as DynChainable<i64>,
        ]);

        let json = serde_json::to_value(seq.schema()).unwrap();
        assert_eq!(json["kind"], "sequence");
        assert_eq!(json["identity"]["name"], "etl");
        assert_eq!(json["children"][0]["name"], "parse");
        assert_eq!(json["children"][1]["name"], "store");
    }

    #[tokio::test]
    async fn test_sequence_equals_function_composition() {
        // For any successful sequence, the output equals the nested
        // application of its children's functions
        let seq = Sequence::new("composed");
        seq.register([
            Arc::new(Transform::new("double", |_ctx, n: i64| async move { n * 2 }))
                as DynChainable<i64>,
            Arc::new(Transform::new("plus-ten", |_ctx, n: i64| async move { n + 10 }))
                as DynChainable<i64>,
            Arc::new(Transform::new("negate", |_ctx, n: i64| async move { -n }))
                as DynChainable<i64>,
        ]);

        let ctx = Context::background();
        for x in [-100i64, -1, 0, 1, 7, 42, 9999] {
            let expected = -(x * 2 + 10);
            assert_eq!(seq.process(ctx.clone(), x).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_concurrent_branches_cannot_tear_each_other() {
        // Every branch mutates its own clone; the connector's output is
        // value-equal to the input for any payload
        let children: Vec<DynChainable<Vec<i64>>> = (0..8)
            .map(|i| {
                Arc::new(Transform::new(
                    format!("mutator-{i}"),
                    move |_ctx, mut v: Vec<i64>| async move {
                        v.push(i);
                        v.rotate_left(1);
                        v
                    },
                )) as DynChainable<Vec<i64>>
            })
            .collect();
        let fan = Concurrent::new("fan", children);

        let ctx = Context::background();
        for input in [vec![], vec![1], vec![1, 2, 3], (0..50).collect::<Vec<i64>>()] {
            let out = fan.process(ctx.clone(), input.clone()).await.unwrap();
            assert_eq!(out, input);
        }
    }

    #[tokio::test]
    async fn test_race_winner_is_some_branch_result() {
        let children: Vec<DynChainable<i64>> = (1..=4)
            .map(|i| {
                Arc::new(Transform::new(format!("branch-{i}"), move |_ctx, n: i64| async move {
                    n * 10 + i
                })) as DynChainable<i64>
            })
            .collect();
        let race = Race::new("race", children);

        let out = race.process(Context::background(), 5).await.unwrap();
        assert!((51..=54).contains(&out), "winner {out} is not a branch result");
    }

    #[tokio::test]
    async fn test_close_walks_the_tree_without_error() {
        let seq = Sequence::new("tree");
        seq.register([
            Arc::new(Transform::new("leaf", |_ctx, n: i64| async move { n }))
                as DynChainable<i64>,
            Arc::new(Fallback::new(
                "nested",
                [Arc::new(Transform::new("inner", |_ctx, n: i64| async move { n }))
                    as DynChainable<i64>],
            )) as DynChainable<i64>,
        ]);
        assert!(seq.close().is_ok());
    }

    #[tokio::test]
    async fn test_sinks_observe_composed_outcomes() {
        let sink = Arc::new(observe::test_support::RecordingSink::default());
        let shared: SharedSink = sink.clone();

        let inner: DynChainable<i64> = Arc::new(
            Transform::new("work", |_ctx, n: i64| async move { n * 2 })
                .with_sink(shared.clone()),
        );
        let retry = Retry::new("retry", inner, 3).with_sink(shared);

        retry.process(Context::background(), 4).await.unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.kind == Kind::Transform));
        assert!(events.iter().any(|e| e.kind == Kind::Retry));
        assert!(events.iter().all(|e| e.outcome == Outcome::Ok));
    }
}
