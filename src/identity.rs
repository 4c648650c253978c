// Component identity and introspection schema
//
// Every chainable carries a stable, human-readable identity used for error
// paths, logging, and schema introspection. Composites additionally report
// their children so a pipeline's shape can be inspected (or asserted in
// tests) without executing it.

use serde::Serialize;
use std::fmt;

/// Stable name (plus optional instance id) for a pipeline component
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identity {
    /// Human-readable component name
    pub name: String,
    /// Optional instance id, for distinguishing multiple components that
    /// share a name (e.g. two rate limiters in one pipeline)
    pub id: Option<String>,
}

impl Identity {
    /// Create an identity with a name only
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }

    /// Create an identity with a name and an instance id
    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: Some(id.into()),
        }
    }
}

impl From<&str> for Identity {
    fn from(name: &str) -> Self {
        Identity::named(name)
    }
}

impl From<String> for Identity {
    fn from(name: String) -> Self {
        Identity::named(name)
    }
}

impl<N: Into<String>, I: Into<String>> From<(N, I)> for Identity {
    fn from((name, id): (N, I)) -> Self {
        Identity::with_id(name, id)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}#{}", self.name, id),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Kind tag for every component the runtime ships
///
/// Serialized in kebab-case so schema dumps read the same way the kinds are
/// documented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Transform,
    Apply,
    Effect,
    Mutate,
    Enrich,
    Sequence,
    Concurrent,
    Race,
    Contest,
    Fallback,
    Switch,
    Filter,
    Handle,
    Timeout,
    Retry,
    Backoff,
    CircuitBreaker,
    RateLimiter,
    Mock,
    Chaos,
}

impl Kind {
    /// Kebab-case tag, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Transform => "transform",
            Kind::Apply => "apply",
            Kind::Effect => "effect",
            Kind::Mutate => "mutate",
            Kind::Enrich => "enrich",
            Kind::Sequence => "sequence",
            Kind::Concurrent => "concurrent",
            Kind::Race => "race",
            Kind::Contest => "contest",
            Kind::Fallback => "fallback",
            Kind::Switch => "switch",
            Kind::Filter => "filter",
            Kind::Handle => "handle",
            Kind::Timeout => "timeout",
            Kind::Retry => "retry",
            Kind::Backoff => "backoff",
            Kind::CircuitBreaker => "circuit-breaker",
            Kind::RateLimiter => "rate-limiter",
            Kind::Mock => "mock",
            Kind::Chaos => "chaos",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Introspection schema for a component
///
/// Leaves report an empty `children` list; composites list their children in
/// registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub kind: Kind,
    pub identity: Identity,
    pub children: Vec<Identity>,
}

impl Schema {
    /// Schema for a leaf component
    pub fn leaf(kind: Kind, identity: Identity) -> Self {
        Self {
            kind,
            identity,
            children: Vec::new(),
        }
    }

    /// Schema for a composite with the given children
    pub fn composite(kind: Kind, identity: Identity, children: Vec<Identity>) -> Self {
        Self {
            kind,
            identity,
            children,
        }
    }
}
