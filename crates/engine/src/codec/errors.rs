//! Codec error kinds.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// A value could not be represented in the wire format at all — carries
    /// the offending kind name verbatim so callers can log/match on it.
    #[error("cannot serialize value of kind {kind} — use serializable types")]
    Unserializable { kind: &'static str },

    /// Frame payload shorter than the 4-byte tag.
    #[error("truncated frame: payload is shorter than the tag")]
    Truncated,

    /// Frame tag not recognized by this codec.
    #[error("unknown frame tag {tag:?}")]
    UnknownTag { tag: [u8; 4] },

    /// A `ClassInstance` referenced a class id with no registered reviver.
    #[error("no reviver registered for class {class_id}")]
    UnknownClass { class_id: String },

    /// A cyclic-reference placeholder pointed past the allocation table.
    #[error("dangling reference to allocation index {index}")]
    DanglingRef { index: u32 },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("legacy JSON payload was rejected by a decode-only entry point")]
    LegacyJsonRejected,
}
