//! The closed value model every orchestrator/step payload is encoded as.
//!
//! `serde_json::Value` (what the teacher used everywhere for activity
//! input/output) cannot represent cycles, byte-exact typed arrays, or class
//! identity, and this engine's wire contract needs all three, so we close
//! over a dedicated enum instead of reusing JSON.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};

/// A typed numeric array, kept byte-exact instead of round-tripping through
/// f64 the way a JSON array of numbers would.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

/// A slot a cyclic reference can point back into. Allocated empty the
/// moment the encoder/decoder first sees the identity it stands for, then
/// filled once that identity's children have been processed — the
/// "allocate, then fill" two-phase scheme.
#[derive(Debug)]
pub struct ValueCell(OnceLock<Value>);

impl ValueCell {
    pub fn new(value: Value) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(value);
        Self(cell)
    }

    pub(crate) fn empty() -> Self {
        Self(OnceLock::new())
    }

    /// Phase 2 of the allocate/fill decode scheme: fills a slot allocated by
    /// `empty()`. Fails if the slot was already filled.
    pub(crate) fn fill(&self, value: Value) -> Result<(), Value> {
        self.0.set(value)
    }

    /// Panics if called on an object whose fill phase never completed —
    /// that can only happen for a malformed encode, never for a value this
    /// module itself produced.
    pub fn get(&self) -> &Value {
        self.0
            .get()
            .expect("ValueCell read before its fill phase completed")
    }
}

impl PartialEq for ValueCell {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.0.get() == other.0.get()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Arbitrary-precision integer, held as its decimal-string form — no
    /// bignum crate is pulled in beyond what `serde_json`'s
    /// `arbitrary_precision` feature already carries.
    BigInt(String),
    Str(String),
    Bytes(Vec<u8>),
    TypedArray(TypedArray),
    Date(DateTime<Utc>),
    /// Pattern and flags kept as strings; compiled lazily on decode by the
    /// caller so a codec-only context never needs to link `regex`.
    Regex { pattern: String, flags: String },
    /// Ordered sequence.
    List(Vec<Value>),
    /// Ordered record — a `Vec` rather than a map so key order from the
    /// producing side survives the round trip.
    Record(Vec<(String, Value)>),
    /// Ordered map (distinct from `Record`: keys may themselves be
    /// arbitrary `Value`s, not just strings).
    Map(Vec<(Value, Value)>),
    /// Unordered set — encoded/decoded as a sequence, but callers must not
    /// depend on element order surviving a round trip.
    Set(Vec<Value>),
    ClassInstance {
        class_id: String,
        fields: Vec<(String, Value)>,
    },
    /// A value that may be the target of more than one reference in the
    /// same graph. Identity is tracked by `Arc` pointer equality, not by
    /// structural equality, so two `Shared` nodes holding equal values are
    /// still distinct objects to the encoder.
    Shared(Arc<ValueCell>),
}

impl Value {
    pub fn shared(value: Value) -> Value {
        Value::Shared(Arc::new(ValueCell::new(value)))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::BigInt(_) => "bigint",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::TypedArray(_) => "typed_array",
            Value::Date(_) => "date",
            Value::Regex { .. } => "regex",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::ClassInstance { .. } => "class_instance",
            Value::Shared(_) => "shared",
        }
    }

    /// Converts a legacy, byte-free JSON payload into the closed value
    /// model.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::BigInt(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Record(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Approximates this value as JSON, for bridging a typed orchestrator
    /// or step's `serde`-derived `Input`/`Output` through the closed value
    /// model. Lossy for kinds JSON cannot express: bytes become a base64
    /// string, dates an RFC 3339 string, big integers their decimal string,
    /// and maps/sets/class instances/shared nodes flatten to plain
    /// arrays/objects, discarding identity and non-string map keys.
    pub fn to_json(&self) -> serde_json::Value {
        use base64::Engine;
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::json!(i),
            Value::UInt(u) => serde_json::json!(u),
            Value::Float(f) => serde_json::json!(f),
            Value::BigInt(s) => serde_json::Value::String(s.clone()),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
            Value::TypedArray(_) => serde_json::Value::Null,
            Value::Date(d) => serde_json::Value::String(d.to_rfc3339()),
            Value::Regex { pattern, flags } => serde_json::json!({ "pattern": pattern, "flags": flags }),
            Value::List(items) | Value::Set(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Record(fields) | Value::ClassInstance { fields, .. } => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Map(entries) => serde_json::Value::Array(
                entries
                    .iter()
                    .map(|(k, v)| serde_json::json!([k.to_json(), v.to_json()]))
                    .collect(),
            ),
            Value::Shared(cell) => cell.get().to_json(),
        }
    }
}

impl From<&dyn Any> for Value {
    /// Implemented only to let a reducer bail out with `Value::Null` when it
    /// doesn't recognize a type; reducers should otherwise construct
    /// `Value` directly from the fields they extract.
    fn from(_: &dyn Any) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_values_compare_by_identity_not_structure() {
        let cell = Arc::new(ValueCell::new(Value::Int(1)));
        let a = Value::Shared(cell.clone());
        let b = Value::Shared(cell);
        assert_eq!(a, b);

        let c = Value::shared(Value::Int(1));
        // distinct Arc allocations holding equal content still compare equal
        // structurally (PartialEq falls back to content when pointers differ)
        assert_eq!(a, c);
    }

    #[test]
    fn to_json_round_trips_plain_records() {
        let value = Value::Record(vec![("a".into(), Value::Int(1)), ("b".into(), Value::Str("x".into()))]);
        assert_eq!(value.to_json(), serde_json::json!({"a": 1, "b": "x"}));
    }

    #[test]
    fn from_json_preserves_object_key_order() {
        let json = serde_json::json!({"b": 1, "a": 2});
        let value = Value::from_json(json);
        match value {
            Value::Record(fields) => assert_eq!(fields[0].0, "b"),
            _ => panic!("expected record"),
        }
    }
}
