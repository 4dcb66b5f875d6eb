//! Opaque, stable, orderable identifiers used throughout the engine.
//!
//! Every id type wraps either a UUIDv7 (time-ordered, so lexical/numeric
//! ordering matches creation order without a separate sequence column) or a
//! caller-chosen string (workflow/class names, stream names), never exposing
//! the wrapped representation as part of its public API beyond `Display`,
//! `FromStr` and the explicit `as_uuid`/`as_str` accessors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A malformed identifier was supplied where a typed id was expected.
#[derive(Debug, Error)]
#[error("invalid {kind} id: {value}")]
pub struct IdParseError {
    kind: &'static str,
    value: String,
}

macro_rules! uuid_id {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new, time-ordered id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| IdParseError {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }
    };
}

uuid_id!(RunId, "run");
uuid_id!(EventId, "event");
uuid_id!(HookId, "hook");

/// Identifies the invocation that produced an event: an incrementing
/// call-site counter local to one orchestrator replay (spec step/hook/wait
/// correlation). Not a UUID — it must be cheap to derive deterministically
/// from `(run_id, counter)` on every replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u32);

impl CorrelationId {
    pub fn from_counter(counter: u32) -> Self {
        Self(counter)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corr-{}", self.0)
    }
}

/// A step is addressed by the correlation id of the intent that scheduled
/// it; `StepId` exists as a distinct type so storage/queue code never
/// confuses "the id of a step invocation" with "the id of a hook" even
/// though both are backed by a `CorrelationId` at the wire level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(CorrelationId);

impl StepId {
    pub fn from_correlation(id: CorrelationId) -> Self {
        Self(id)
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step-{}", self.0 .0)
    }
}

/// Name of a registered orchestrator type, e.g. `"order_fulfillment"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowName(String);

impl WorkflowName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkflowName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifies a user-defined class registered with the codec for
/// `ClassInstance` encode/decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(String);

impl ClassId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stream name, required to carry the `strm_` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    const PREFIX: &'static str = "strm_";

    pub fn new(name: impl Into<String>) -> Result<Self, IdParseError> {
        let name = name.into();
        if !name.starts_with(Self::PREFIX) {
            return Err(IdParseError {
                kind: "stream",
                value: name,
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrips_through_string() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn run_ids_are_time_ordered() {
        let a = RunId::new();
        let b = RunId::new();
        assert!(a < b, "later-generated RunId must sort after the earlier one");
    }

    #[test]
    fn stream_name_requires_prefix() {
        assert!(StreamName::new("strm_abc").is_ok());
        assert!(StreamName::new("abc").is_err());
    }

    #[test]
    fn correlation_id_display_is_stable() {
        let id = CorrelationId::from_counter(3);
        assert_eq!(id.to_string(), "corr-3");
        assert_eq!(id.as_u32(), 3);
    }
}
