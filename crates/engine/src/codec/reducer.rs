//! Reducers turn a Rust type into a `Value::ClassInstance`'s field list;
//! revivers do the inverse. Both are looked up by a `&'static str` kind name
//! in registration order, first match wins — literally the "(kind -> fn)"
//! table the codec's cyclic/class support is built around.
//!
//! The three built-in kinds each implement both traits on the same marker
//! type, since reducing and reviving a `StepId`/`HookId`/`StreamName` are
//! two directions of the same class_id, not independent behaviors.

use std::any::Any;
use std::str::FromStr;

use super::value::Value;
use crate::codec::errors::CodecError;
use crate::ids::{CorrelationId, HookId, StepId, StreamName};

pub trait Reducer: Send + Sync {
    /// The class id this reducer recognizes, e.g. `"step_ref"`.
    fn kind(&self) -> &'static str;

    /// Attempt to flatten `instance` into its class_id + field list. Returns
    /// `None` if `instance` isn't the type this reducer handles (the caller
    /// tries the next registered reducer).
    fn reduce(&self, instance: &dyn Any) -> Option<Vec<(String, Value)>>;
}

pub trait Reviver: Send + Sync {
    /// The class id this reviver reconstructs.
    fn kind(&self) -> &'static str;

    fn revive(&self, fields: Vec<(String, Value)>) -> Result<Box<dyn Any + Send + Sync>, CodecError>;
}

/// Reduces/revives a `StepId` reference embedded in an orchestrator's
/// payload (e.g. a value that names "the step whose output feeds this
/// one") — built in because the replay engine itself needs it, unlike
/// user-supplied classes.
pub struct StepRefReducer;

impl Reducer for StepRefReducer {
    fn kind(&self) -> &'static str {
        "step_ref"
    }

    fn reduce(&self, instance: &dyn Any) -> Option<Vec<(String, Value)>> {
        instance
            .downcast_ref::<StepId>()
            .map(|id| vec![("correlation".to_string(), Value::UInt(id.correlation_id().as_u32() as u64))])
    }
}

impl Reviver for StepRefReducer {
    fn kind(&self) -> &'static str {
        "step_ref"
    }

    fn revive(&self, fields: Vec<(String, Value)>) -> Result<Box<dyn Any + Send + Sync>, CodecError> {
        let correlation = fields
            .into_iter()
            .find(|(key, _)| key == "correlation")
            .and_then(|(_, value)| match value {
                Value::UInt(n) => Some(n as u32),
                _ => None,
            })
            .ok_or_else(|| CodecError::Malformed("step_ref missing a uint \"correlation\" field".into()))?;

        Ok(Box::new(StepId::from_correlation(CorrelationId::from_counter(correlation))))
    }
}

/// Reduces/revives a `HookId` + token pair so orchestrator code can pass a
/// hook handle through a step's arguments without leaking the raw token
/// type across the codec boundary.
pub struct HookRefReducer;

impl Reducer for HookRefReducer {
    fn kind(&self) -> &'static str {
        "hook_ref"
    }

    fn reduce(&self, instance: &dyn Any) -> Option<Vec<(String, Value)>> {
        instance
            .downcast_ref::<HookId>()
            .map(|id| vec![("id".to_string(), Value::Str(id.to_string()))])
    }
}

impl Reviver for HookRefReducer {
    fn kind(&self) -> &'static str {
        "hook_ref"
    }

    fn revive(&self, fields: Vec<(String, Value)>) -> Result<Box<dyn Any + Send + Sync>, CodecError> {
        let id = fields
            .into_iter()
            .find(|(key, _)| key == "id")
            .and_then(|(_, value)| match value {
                Value::Str(s) => Some(s),
                _ => None,
            })
            .ok_or_else(|| CodecError::Malformed("hook_ref missing a string \"id\" field".into()))?;

        HookId::from_str(&id)
            .map(|id| Box::new(id) as Box<dyn Any + Send + Sync>)
            .map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

/// Reduces/revives a `StreamName` so it can travel inside a payload the
/// same way a `StepId`/`HookId` does.
pub struct StreamRefReducer;

impl Reducer for StreamRefReducer {
    fn kind(&self) -> &'static str {
        "stream_ref"
    }

    fn reduce(&self, instance: &dyn Any) -> Option<Vec<(String, Value)>> {
        instance
            .downcast_ref::<StreamName>()
            .map(|name| vec![("name".to_string(), Value::Str(name.to_string()))])
    }
}

impl Reviver for StreamRefReducer {
    fn kind(&self) -> &'static str {
        "stream_ref"
    }

    fn revive(&self, fields: Vec<(String, Value)>) -> Result<Box<dyn Any + Send + Sync>, CodecError> {
        let name = fields
            .into_iter()
            .find(|(key, _)| key == "name")
            .and_then(|(_, value)| match value {
                Value::Str(s) => Some(s),
                _ => None,
            })
            .ok_or_else(|| CodecError::Malformed("stream_ref missing a string \"name\" field".into()))?;

        StreamName::new(name)
            .map(|name| Box::new(name) as Box<dyn Any + Send + Sync>)
            .map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_ref_reducer_only_matches_step_id() {
        let reducer = StepRefReducer;
        let not_a_step: i64 = 5;
        assert!(reducer.reduce(&not_a_step).is_none());
    }

    #[test]
    fn step_ref_reducer_reduces_step_id() {
        let id = StepId::from_correlation(CorrelationId::from_counter(1));
        let fields = StepRefReducer.reduce(&id).unwrap();
        assert_eq!(fields[0].0, "correlation");
    }

    #[test]
    fn step_ref_round_trips_through_reduce_and_revive() {
        let id = StepId::from_correlation(CorrelationId::from_counter(7));
        let fields = StepRefReducer.reduce(&id).unwrap();
        let revived = StepRefReducer.revive(fields).unwrap();
        assert_eq!(*revived.downcast::<StepId>().unwrap(), id);
    }

    #[test]
    fn hook_ref_round_trips_through_reduce_and_revive() {
        let id = HookId::new();
        let fields = HookRefReducer.reduce(&id).unwrap();
        let revived = HookRefReducer.revive(fields).unwrap();
        assert_eq!(*revived.downcast::<HookId>().unwrap(), id);
    }

    #[test]
    fn stream_ref_round_trips_through_reduce_and_revive() {
        let name = StreamName::new("strm_orders").unwrap();
        let fields = StreamRefReducer.reduce(&name).unwrap();
        let revived = StreamRefReducer.revive(fields).unwrap();
        assert_eq!(*revived.downcast::<StreamName>().unwrap(), name);
    }

    #[test]
    fn hook_ref_revive_rejects_malformed_id() {
        let fields = vec![("id".to_string(), Value::Str("not-a-uuid".to_string()))];
        assert!(HookRefReducer.revive(fields).is_err());
    }
}
