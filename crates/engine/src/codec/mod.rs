//! Framed, versioned, cycle-capable serialization codec.
//!
//! Every encoded payload is a 4-byte ASCII tag followed by a payload:
//! `devl` for this codec's own binary format, `json` (decode-only, via
//! [`Codec::decode_any`]) for legacy byte-free JSON blobs produced before
//! this format existed. An unrecognized tag or a payload under 4 bytes is a
//! fatal [`CodecError`], never a silent fallback.
//!
//! Grounded on the teacher's pervasive use of `serde_json::Value` as a
//! dynamically-typed payload wrapper in `workflow/event.rs`, generalized
//! into the closed [`Value`] enum JSON cannot represent (cycles, byte-exact
//! typed arrays, class identity).

mod errors;
mod reducer;
mod value;

pub use errors::CodecError;
pub use reducer::{HookRefReducer, Reducer, Reviver, StepRefReducer, StreamRefReducer};
pub use value::{TypedArray, Value, ValueCell};

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

const TAG_DEVL: &[u8; 4] = b"devl";
const TAG_JSON: &[u8; 4] = b"json";

const T_NULL: u8 = 0x00;
const T_BOOL: u8 = 0x01;
const T_INT: u8 = 0x02;
const T_UINT: u8 = 0x03;
const T_FLOAT: u8 = 0x04;
const T_BIGINT: u8 = 0x05;
const T_STR: u8 = 0x06;
const T_BYTES: u8 = 0x07;
const T_TYPED_ARRAY: u8 = 0x08;
const T_DATE: u8 = 0x09;
const T_REGEX: u8 = 0x0A;
const T_LIST: u8 = 0x0B;
const T_RECORD: u8 = 0x0C;
const T_MAP: u8 = 0x0D;
const T_SET: u8 = 0x0E;
const T_CLASS: u8 = 0x0F;
const T_OBJ_DEF: u8 = 0x10;
const T_OBJ_REF: u8 = 0x11;

const TA_I8: u8 = 0;
const TA_U8: u8 = 1;
const TA_I16: u8 = 2;
const TA_U16: u8 = 3;
const TA_I32: u8 = 4;
const TA_U32: u8 = 5;
const TA_F32: u8 = 6;
const TA_F64: u8 = 7;

/// A `Vec<(&'static str, Box<dyn Reducer>)>` / reviver pair consulted in
/// order — first match wins, matching the "(kind -> fn)" contract.
pub struct Codec {
    reducers: Vec<Box<dyn Reducer>>,
    revivers: Vec<Box<dyn Reviver>>,
}

pub struct CodecBuilder {
    reducers: Vec<Box<dyn Reducer>>,
    revivers: Vec<Box<dyn Reviver>>,
}

impl CodecBuilder {
    pub fn new() -> Self {
        Self {
            reducers: Vec::new(),
            revivers: Vec::new(),
        }
    }

    /// Pre-registers the engine's own reducers/revivers (stream/hook/step
    /// references). Callers' custom reducers/revivers are registered after
    /// this and are checked *first*, giving them override priority over the
    /// built-ins.
    pub fn with_defaults() -> Self {
        let mut builder = Self::new();
        builder.reducers.push(Box::new(StepRefReducer));
        builder.reducers.push(Box::new(HookRefReducer));
        builder.reducers.push(Box::new(StreamRefReducer));
        builder.revivers.push(Box::new(StepRefReducer));
        builder.revivers.push(Box::new(HookRefReducer));
        builder.revivers.push(Box::new(StreamRefReducer));
        builder
    }

    pub fn register_reducer(mut self, reducer: impl Reducer + 'static) -> Self {
        self.reducers.insert(0, Box::new(reducer));
        self
    }

    pub fn register_reviver(mut self, reviver: impl Reviver + 'static) -> Self {
        self.revivers.insert(0, Box::new(reviver));
        self
    }

    pub fn build(self) -> Codec {
        Codec {
            reducers: self.reducers,
            revivers: self.revivers,
        }
    }
}

impl Default for CodecBuilder {
    fn default() -> Self {
        Self::with_defaults()
    }
}

struct EncodeCtx {
    seen: HashMap<usize, u32>,
    next_index: u32,
}

struct DecodeCtx<'a> {
    buf: &'a [u8],
    pos: usize,
    slots: Vec<Arc<ValueCell>>,
}

impl<'a> DecodeCtx<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::Malformed("unexpected end of payload".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?.to_vec();
        String::from_utf8(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

impl Codec {
    /// Encodes `value` into the `devl`-framed wire format.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(TAG_DEVL);
        let mut ctx = EncodeCtx {
            seen: HashMap::new(),
            next_index: 0,
        };
        encode_value(value, &mut ctx, &mut buf)?;
        Ok(buf)
    }

    /// Decodes a `devl`-framed payload. Rejects anything else, including
    /// legacy JSON — use [`Codec::decode_any`] for that.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        if bytes.len() < 4 {
            return Err(CodecError::Truncated);
        }
        let (tag, payload) = bytes.split_at(4);
        if tag != TAG_DEVL {
            return Err(CodecError::UnknownTag {
                tag: tag.try_into().unwrap(),
            });
        }
        let mut ctx = DecodeCtx {
            buf: payload,
            pos: 0,
            slots: Vec::new(),
        };
        decode_value(&mut ctx, &self.revivers)
    }

    /// Decode-only entry point that additionally accepts a `json`-tagged
    /// legacy payload, converting it via [`Value::from_json`].
    pub fn decode_any(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        if bytes.len() < 4 {
            return Err(CodecError::Truncated);
        }
        let (tag, payload) = bytes.split_at(4);
        if tag == TAG_JSON {
            let json: serde_json::Value = serde_json::from_slice(payload)
                .map_err(|e| CodecError::Malformed(e.to_string()))?;
            return Ok(Value::from_json(json));
        }
        self.decode(bytes)
    }

    pub fn reducers(&self) -> &[Box<dyn Reducer>] {
        &self.reducers
    }

    pub fn revivers(&self) -> &[Box<dyn Reviver>] {
        &self.revivers
    }

    /// Flattens a native type through the first matching registered
    /// [`Reducer`] and encodes the resulting `Value::ClassInstance` — the
    /// encode-side counterpart to [`Codec::revive`].
    pub fn encode_class(&self, instance: &dyn Any) -> Result<Vec<u8>, CodecError> {
        for reducer in &self.reducers {
            if let Some(fields) = reducer.reduce(instance) {
                let value = Value::ClassInstance {
                    class_id: reducer.kind().to_string(),
                    fields,
                };
                return self.encode(&value);
            }
        }
        Err(CodecError::Unserializable { kind: "class_instance" })
    }

    /// Reconstructs the native type a `Value::ClassInstance` was reduced
    /// from, via the first registered [`Reviver`] whose `kind()` matches its
    /// `class_id`. Caller-registered revivers are checked before the
    /// built-ins (see [`CodecBuilder::with_defaults`]).
    pub fn revive(&self, value: &Value) -> Result<Box<dyn Any + Send + Sync>, CodecError> {
        let Value::ClassInstance { class_id, fields } = value else {
            return Err(CodecError::Unserializable { kind: value.kind_name() });
        };

        self.revivers
            .iter()
            .find(|reviver| reviver.kind() == class_id)
            .ok_or_else(|| CodecError::UnknownClass { class_id: class_id.clone() })?
            .revive(fields.clone())
    }
}

fn encode_value(value: &Value, ctx: &mut EncodeCtx, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    match value {
        Value::Null => buf.push(T_NULL),
        Value::Bool(b) => {
            buf.push(T_BOOL);
            buf.push(*b as u8);
        }
        Value::Int(i) => {
            buf.push(T_INT);
            buf.extend_from_slice(&i.to_be_bytes());
        }
        Value::UInt(u) => {
            buf.push(T_UINT);
            buf.extend_from_slice(&u.to_be_bytes());
        }
        Value::Float(f) => {
            buf.push(T_FLOAT);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        Value::BigInt(s) => {
            buf.push(T_BIGINT);
            write_string(s, buf);
        }
        Value::Str(s) => {
            buf.push(T_STR);
            write_string(s, buf);
        }
        Value::Bytes(b) => {
            buf.push(T_BYTES);
            write_bytes(b, buf);
        }
        Value::TypedArray(ta) => {
            buf.push(T_TYPED_ARRAY);
            encode_typed_array(ta, buf);
        }
        Value::Date(d) => {
            buf.push(T_DATE);
            buf.extend_from_slice(&d.timestamp_millis().to_be_bytes());
        }
        Value::Regex { pattern, flags } => {
            buf.push(T_REGEX);
            write_string(pattern, buf);
            write_string(flags, buf);
        }
        Value::List(items) => {
            buf.push(T_LIST);
            buf.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_value(item, ctx, buf)?;
            }
        }
        Value::Record(fields) => {
            buf.push(T_RECORD);
            buf.extend_from_slice(&(fields.len() as u32).to_be_bytes());
            for (key, val) in fields {
                write_string(key, buf);
                encode_value(val, ctx, buf)?;
            }
        }
        Value::Map(entries) => {
            buf.push(T_MAP);
            buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
            for (k, v) in entries {
                encode_value(k, ctx, buf)?;
                encode_value(v, ctx, buf)?;
            }
        }
        Value::Set(items) => {
            buf.push(T_SET);
            buf.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_value(item, ctx, buf)?;
            }
        }
        Value::ClassInstance { class_id, fields } => {
            buf.push(T_CLASS);
            write_string(class_id, buf);
            buf.extend_from_slice(&(fields.len() as u32).to_be_bytes());
            for (key, val) in fields {
                write_string(key, buf);
                encode_value(val, ctx, buf)?;
            }
        }
        Value::Shared(cell) => {
            let ptr = Arc::as_ptr(cell) as usize;
            if let Some(&index) = ctx.seen.get(&ptr) {
                buf.push(T_OBJ_REF);
                buf.extend_from_slice(&index.to_be_bytes());
            } else {
                let index = ctx.next_index;
                ctx.next_index += 1;
                ctx.seen.insert(ptr, index);
                buf.push(T_OBJ_DEF);
                buf.extend_from_slice(&index.to_be_bytes());
                encode_value(cell.get(), ctx, buf)?;
            }
        }
    }
    Ok(())
}

fn write_string(s: &str, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn write_bytes(b: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
    buf.extend_from_slice(b);
}

fn encode_typed_array(ta: &TypedArray, buf: &mut Vec<u8>) {
    macro_rules! write_array {
        ($subtype:expr, $items:expr, $width:expr, $to_be:expr) => {{
            buf.push($subtype);
            buf.extend_from_slice(&($items.len() as u32).to_be_bytes());
            for item in $items {
                buf.extend_from_slice(&$to_be(*item));
            }
        }};
    }
    match ta {
        TypedArray::Int8(v) => write_array!(TA_I8, v, 1, |x: i8| [x as u8]),
        TypedArray::UInt8(v) => write_array!(TA_U8, v, 1, |x: u8| [x]),
        TypedArray::Int16(v) => write_array!(TA_I16, v, 2, |x: i16| x.to_be_bytes()),
        TypedArray::UInt16(v) => write_array!(TA_U16, v, 2, |x: u16| x.to_be_bytes()),
        TypedArray::Int32(v) => write_array!(TA_I32, v, 4, |x: i32| x.to_be_bytes()),
        TypedArray::UInt32(v) => write_array!(TA_U32, v, 4, |x: u32| x.to_be_bytes()),
        TypedArray::Float32(v) => write_array!(TA_F32, v, 4, |x: f32| x.to_be_bytes()),
        TypedArray::Float64(v) => write_array!(TA_F64, v, 8, |x: f64| x.to_be_bytes()),
    }
}

fn decode_typed_array(ctx: &mut DecodeCtx) -> Result<TypedArray, CodecError> {
    let subtype = ctx.u8()?;
    let count = ctx.u32()? as usize;
    Ok(match subtype {
        TA_I8 => TypedArray::Int8(
            (0..count)
                .map(|_| ctx.u8().map(|b| b as i8))
                .collect::<Result<_, _>>()?,
        ),
        TA_U8 => TypedArray::UInt8((0..count).map(|_| ctx.u8()).collect::<Result<_, _>>()?),
        TA_I16 => TypedArray::Int16(
            (0..count)
                .map(|_| Ok(i16::from_be_bytes(ctx.take(2)?.try_into().unwrap())))
                .collect::<Result<_, CodecError>>()?,
        ),
        TA_U16 => TypedArray::UInt16(
            (0..count)
                .map(|_| Ok(u16::from_be_bytes(ctx.take(2)?.try_into().unwrap())))
                .collect::<Result<_, CodecError>>()?,
        ),
        TA_I32 => TypedArray::Int32(
            (0..count)
                .map(|_| Ok(i32::from_be_bytes(ctx.take(4)?.try_into().unwrap())))
                .collect::<Result<_, CodecError>>()?,
        ),
        TA_U32 => TypedArray::UInt32(
            (0..count)
                .map(|_| Ok(u32::from_be_bytes(ctx.take(4)?.try_into().unwrap())))
                .collect::<Result<_, CodecError>>()?,
        ),
        TA_F32 => TypedArray::Float32(
            (0..count)
                .map(|_| Ok(f32::from_be_bytes(ctx.take(4)?.try_into().unwrap())))
                .collect::<Result<_, CodecError>>()?,
        ),
        TA_F64 => TypedArray::Float64(
            (0..count)
                .map(|_| ctx.f64())
                .collect::<Result<_, CodecError>>()?,
        ),
        other => return Err(CodecError::Malformed(format!("unknown typed array subtype {other}"))),
    })
}

fn decode_value(ctx: &mut DecodeCtx, revivers: &[Box<dyn Reviver>]) -> Result<Value, CodecError> {
    let tag = ctx.u8()?;
    Ok(match tag {
        T_NULL => Value::Null,
        T_BOOL => Value::Bool(ctx.u8()? != 0),
        T_INT => Value::Int(ctx.i64()?),
        T_UINT => Value::UInt(ctx.u64()?),
        T_FLOAT => Value::Float(ctx.f64()?),
        T_BIGINT => Value::BigInt(ctx.string()?),
        T_STR => Value::Str(ctx.string()?),
        T_BYTES => Value::Bytes(ctx.bytes()?),
        T_TYPED_ARRAY => Value::TypedArray(decode_typed_array(ctx)?),
        T_DATE => {
            let millis = ctx.i64()?;
            Value::Date(
                chrono::DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| CodecError::Malformed("invalid timestamp".into()))?,
            )
        }
        T_REGEX => {
            let pattern = ctx.string()?;
            let flags = ctx.string()?;
            Value::Regex { pattern, flags }
        }
        T_LIST => {
            let count = ctx.u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_value(ctx, revivers)?);
            }
            Value::List(items)
        }
        T_RECORD => {
            let count = ctx.u32()? as usize;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                let key = ctx.string()?;
                fields.push((key, decode_value(ctx, revivers)?));
            }
            Value::Record(fields)
        }
        T_MAP => {
            let count = ctx.u32()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let k = decode_value(ctx, revivers)?;
                let v = decode_value(ctx, revivers)?;
                entries.push((k, v));
            }
            Value::Map(entries)
        }
        T_SET => {
            let count = ctx.u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_value(ctx, revivers)?);
            }
            Value::Set(items)
        }
        T_CLASS => {
            let class_id = ctx.string()?;
            let count = ctx.u32()? as usize;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                let key = ctx.string()?;
                fields.push((key, decode_value(ctx, revivers)?));
            }
            // Best-effort validation: a class id with a registered reviver
            // must actually revive, so a corrupt step/hook/stream reference
            // fails at decode rather than surfacing later as a confusing
            // downcast failure. A class id with no registered reviver yet
            // (a caller's own class, registered after this decode call)
            // passes through unchecked.
            if let Some(reviver) = revivers.iter().find(|r| r.kind() == class_id) {
                reviver.revive(fields.clone())?;
            }
            Value::ClassInstance { class_id, fields }
        }
        T_OBJ_DEF => {
            let index = ctx.u32()? as usize;
            if index != ctx.slots.len() {
                return Err(CodecError::Malformed(format!(
                    "out-of-order object definition: expected index {}, got {index}",
                    ctx.slots.len()
                )));
            }
            // Phase 1: allocate the placeholder before recursing, so a
            // cyclic reference back to this object resolves against it.
            let cell = Arc::new(ValueCell::empty());
            ctx.slots.push(cell.clone());
            // Phase 2: fill it once the inner value is fully decoded.
            let inner = decode_value(ctx, revivers)?;
            cell.fill(inner)
                .map_err(|_| CodecError::Malformed("object slot filled twice".into()))?;
            Value::Shared(cell)
        }
        T_OBJ_REF => {
            let index = ctx.u32()? as usize;
            let cell = ctx
                .slots
                .get(index)
                .ok_or(CodecError::DanglingRef { index: index as u32 })?
                .clone();
            Value::Shared(cell)
        }
        other => return Err(CodecError::Malformed(format!("unknown value tag {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> Codec {
        CodecBuilder::with_defaults().build()
    }

    #[test]
    fn round_trips_primitives() {
        let c = codec();
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Int(-42),
            Value::UInt(42),
            Value::Float(3.5),
            Value::Str("hello".into()),
            Value::Bytes(vec![1, 2, 3]),
        ] {
            let encoded = c.encode(&value).unwrap();
            let decoded = c.decode(&encoded).unwrap();
            assert_eq!(value, decoded);
        }
    }

    #[test]
    fn round_trips_record_preserving_key_order() {
        let c = codec();
        let value = Value::Record(vec![
            ("z".into(), Value::Int(1)),
            ("a".into(), Value::Int(2)),
        ]);
        let decoded = c.decode(&c.encode(&value).unwrap()).unwrap();
        match decoded {
            Value::Record(fields) => {
                assert_eq!(fields[0].0, "z");
                assert_eq!(fields[1].0, "a");
            }
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn round_trips_shared_value_referenced_twice() {
        let c = codec();
        let shared = Value::shared(Value::Str("shared".into()));
        let value = Value::List(vec![shared.clone(), shared]);
        let encoded = c.encode(&value).unwrap();
        let decoded = c.decode(&encoded).unwrap();
        match decoded {
            Value::List(items) => {
                assert_eq!(items.len(), 2);
                match (&items[0], &items[1]) {
                    (Value::Shared(a), Value::Shared(b)) => assert!(Arc::ptr_eq(a, b)),
                    _ => panic!("expected shared values"),
                }
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn encode_class_and_revive_round_trip_a_step_ref() {
        let c = codec();
        let id = crate::ids::StepId::from_correlation(crate::ids::CorrelationId::from_counter(3));

        let encoded = c.encode_class(&id).unwrap();
        let decoded = c.decode(&encoded).unwrap();
        let revived = c.revive(&decoded).unwrap();

        assert_eq!(*revived.downcast::<crate::ids::StepId>().unwrap(), id);
    }

    #[test]
    fn decode_rejects_a_step_ref_with_a_malformed_correlation_field() {
        let c = codec();
        let bogus = Value::ClassInstance {
            class_id: "step_ref".to_string(),
            fields: vec![("correlation".to_string(), Value::Str("not-a-number".to_string()))],
        };
        let encoded = c.encode(&bogus).unwrap();
        assert!(matches!(c.decode(&encoded), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn revive_reports_unknown_class_for_an_unregistered_kind() {
        let c = codec();
        let value = Value::ClassInstance {
            class_id: "not_a_registered_kind".to_string(),
            fields: vec![],
        };
        assert!(matches!(c.revive(&value), Err(CodecError::UnknownClass { .. })));
    }

    #[test]
    fn rejects_unknown_tag() {
        let c = codec();
        let mut bytes = b"oops".to_vec();
        bytes.extend_from_slice(&[0u8; 4]);
        assert!(matches!(c.decode(&bytes), Err(CodecError::UnknownTag { .. })));
    }

    #[test]
    fn rejects_truncated_payload() {
        let c = codec();
        assert!(matches!(c.decode(b"ab"), Err(CodecError::Truncated)));
    }

    #[test]
    fn decode_any_accepts_legacy_json() {
        let c = codec();
        let mut bytes = TAG_JSON.to_vec();
        bytes.extend_from_slice(br#"{"a":1}"#);
        let decoded = c.decode_any(&bytes).unwrap();
        match decoded {
            Value::Record(fields) => assert_eq!(fields[0].0, "a"),
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn decode_rejects_legacy_json() {
        let c = codec();
        let mut bytes = TAG_JSON.to_vec();
        bytes.extend_from_slice(br#"{}"#);
        assert!(matches!(c.decode(&bytes), Err(CodecError::UnknownTag { .. })));
    }
}
