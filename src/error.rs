// ABOUTME: Error types for protograph model building, serialization and deserialization.
// ABOUTME: Split into build-time (schema), wire-format and semantic taxonomies.

use crate::wire::WireType;
use std::fmt;
use thiserror::Error;

/// The result type for protograph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Diagnostic context attached to per-call failures.
///
/// Carries enough state to diagnose a malformed stream without source access:
/// the field being processed, its wire type (if one was parsed), the byte
/// offset of the cursor and the current nesting depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireContext {
    /// Field number being processed, 0 if none.
    pub field: u32,
    /// Wire type of the pending field, if a header was parsed.
    pub wire_type: Option<WireType>,
    /// Byte offset into the stream.
    pub offset: usize,
    /// Sub-item nesting depth.
    pub depth: usize,
}

impl fmt::Display for WireContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {}, offset {}, depth {}", self.field, self.offset, self.depth)?;
        if let Some(wt) = self.wire_type {
            write!(f, ", wire type {wt:?}")?;
        }
        Ok(())
    }
}

/// Errors raised during model building or (de)serialization.
///
/// Build-time (schema) errors are reported at `freeze` and never deferred to
/// first use. Wire-format and semantic errors are fatal to the current call;
/// the stream is considered corrupt from that point, but no state leaks into
/// subsequent calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ------------------------------------------------------------------
    // Build-time (schema) errors
    // ------------------------------------------------------------------
    /// Two declared fields of one type claimed the same field number.
    #[error("duplicate field number {field} on type {type_name}")]
    DuplicateFieldNumber { type_name: String, field: u32 },

    /// A field describes a collection shape the wire format cannot carry.
    #[error("unsupported shape on {type_name} field {field}: {detail}")]
    UnsupportedShape {
        type_name: String,
        field: u32,
        detail: String,
    },

    /// A required field also configured a default value.
    #[error("field {field} on type {type_name} is required but declares a default")]
    ConflictingRequiredDefault { type_name: String, field: u32 },

    /// Mutually exclusive type capabilities were combined.
    #[error("unsupported combination on type {type_name}: {detail}")]
    UnsupportedCombination { type_name: String, detail: String },

    /// An enum descriptor declares conflicting mappings.
    #[error("ambiguous mapping in enum {enum_name}: {detail}")]
    AmbiguousEnumMapping { enum_name: String, detail: String },

    /// A declared field number collides with the collection length sentinel.
    #[error("field {field} on type {type_name} collides with the length sentinel")]
    SentinelCollision { type_name: String, field: u32 },

    /// A type or enum id does not belong to this model.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Registration was attempted after the model was frozen.
    #[error("model is already finalized")]
    ModelAlreadyFinalized,

    // ------------------------------------------------------------------
    // Wire-format errors
    // ------------------------------------------------------------------
    /// A varint ran past 10 bytes or overflowed its target width.
    #[error("malformed varint ({0})")]
    MalformedVarint(WireContext),

    /// A field header carried a wire type outside the known set.
    #[error("unsupported wire type {raw} ({context})")]
    UnsupportedWireType { raw: u8, context: WireContext },

    /// The parsed wire type does not match the declared field type.
    #[error("wire type mismatch: expected {expected:?}, got {actual:?} ({context})")]
    WireTypeMismatch {
        expected: WireType,
        actual: WireType,
        context: WireContext,
    },

    /// A sub-item or payload ended beyond its declared bound, or input ran out.
    #[error("truncated or corrupt stream ({0})")]
    TruncatedOrCorrupt(WireContext),

    /// Sub-item nesting exceeded the configured maximum.
    #[error("nesting too deep ({0})")]
    NestingTooDeep(WireContext),

    /// A collection length prefix exceeded the configured read limit.
    #[error("collection length {claimed} exceeds limit {limit} ({context})")]
    LengthLimitExceeded {
        claimed: u64,
        limit: u64,
        context: WireContext,
    },

    /// A string payload was not valid UTF-8.
    #[error("invalid UTF-8 in string payload ({0})")]
    InvalidUtf8(WireContext),

    /// Start/end sub-item calls were not balanced when output was finished.
    #[error("unbalanced sub-items at end of write")]
    UnbalancedSubItems,

    // ------------------------------------------------------------------
    // Semantic errors
    // ------------------------------------------------------------------
    /// A value's concrete type is not registered under the declared type.
    #[error("unexpected subtype: {actual} is not a registered subtype of {declared}")]
    UnexpectedSubtype { declared: String, actual: String },

    /// A required field held null at write time, or never arrived on read.
    #[error("missing required field {field} on type {type_name}")]
    MissingRequiredField { type_name: String, field: u32 },

    /// A cyclic object graph was found where reference tracking is disabled.
    #[error("recursive object graph detected through type {type_name}")]
    RecursiveGraph { type_name: String },

    /// An enum wire value outside all declared mappings.
    #[error("undefined value {value} for enum {enum_name}")]
    UndefinedEnumValue { enum_name: String, value: i64 },

    /// A value's shape does not match what the serializer node expects.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A value outside the range its wire encoding can carry.
    #[error("{what} exceeds the range of its encoding")]
    OutOfRange { what: &'static str },

    /// A length-prefixed stream declared a type incompatible with the caller's.
    #[error("root type mismatch: expected {expected}, stream declared {found}")]
    RootTypeMismatch { expected: String, found: String },

    /// IO error while flushing to a writer.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
