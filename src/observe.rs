// Observability sinks
//
// Sinks are capabilities passed at construction via `with_sink` on each
// component. One record per `process` call: kind, identity, duration,
// outcome. No module-level state - a component without a sink records
// nothing, and ambient `tracing` events are emitted either way.

use crate::chainable::ProcessResult;
use crate::identity::{Identity, Kind};
use std::sync::Arc;
use std::time::Duration;

/// How a `process` call concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Completed successfully
    Ok,
    /// Returned an error
    Failed,
    /// Failed with the timeout flag set
    TimedOut,
    /// Failed with the canceled flag set
    Canceled,
    /// Rejected without invoking inner work (open breaker, empty bucket)
    Rejected,
}

/// One observation of a component call
#[derive(Debug, Clone)]
pub struct SinkEvent {
    pub kind: Kind,
    pub identity: Identity,
    pub duration: Duration,
    pub outcome: Outcome,
}

/// Capability interface for metrics/tracing backends
pub trait EventSink: Send + Sync {
    fn record(&self, event: SinkEvent);
}

/// Shared sink handle stored by components
pub type SharedSink = Arc<dyn EventSink>;

/// Classify a finished call for sink reporting
pub(crate) fn outcome_of<T>(result: &ProcessResult<T>) -> Outcome {
    match result {
        Ok(_) => Outcome::Ok,
        Err(err) if err.is_timeout() => Outcome::TimedOut,
        Err(err) if err.is_canceled() => Outcome::Canceled,
        Err(_) => Outcome::Failed,
    }
}

/// Record to an optional sink
pub(crate) fn emit(
    sink: &Option<SharedSink>,
    kind: Kind,
    identity: &Identity,
    duration: Duration,
    outcome: Outcome,
) {
    if let Some(sink) = sink {
        sink.record(SinkEvent {
            kind,
            identity: identity.clone(),
            duration,
            outcome,
        });
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingSink;
    use super::*;
    use crate::error::{Failure, PipelineError};

    #[test]
    fn test_outcome_classification() {
        let ok: ProcessResult<u32> = Ok(1);
        assert_eq!(outcome_of(&ok), Outcome::Ok);

        let failed: ProcessResult<u32> = Err(PipelineError::from_cause(
            Identity::named("x"),
            Failure::NoWinner,
            1,
            Duration::ZERO,
        ));
        assert_eq!(outcome_of(&failed), Outcome::Failed);

        let timed_out: ProcessResult<u32> = Err(PipelineError::from_context(
            Identity::named("x"),
            crate::context::ContextError::DeadlineExceeded,
            1,
            Duration::ZERO,
        ));
        assert_eq!(outcome_of(&timed_out), Outcome::TimedOut);
    }

    #[test]
    fn test_emit_is_noop_without_sink() {
        // Must not panic or allocate a record anywhere
        emit(
            &None,
            Kind::Transform,
            &Identity::named("t"),
            Duration::ZERO,
            Outcome::Ok,
        );
    }

    #[test]
    fn test_emit_records_through_sink() {
        let sink = Arc::new(RecordingSink::default());
        let shared: SharedSink = sink.clone();
        emit(
            &Some(shared),
            Kind::Retry,
            &Identity::named("r"),
            Duration::from_millis(5),
            Outcome::Failed,
        );
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, Kind::Retry);
        assert_eq!(events[0].outcome, Outcome::Failed);
    }
}
