// ABOUTME: Leaf serializers: one per primitive kind, with build-time format variants.
// ABOUTME: Each writes exactly one payload (header already written) and reads one back.

use crate::error::{Error, Result};
use crate::model::Model;
use crate::reader::ReaderState;
use crate::value::{DateTime, Decimal, Duration, EnumId, Guid, Value};
use crate::wire::{self, WireType};
use crate::writer::WriterState;

/// Wire representation of an integer leaf, fixed at model-build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalarFormat {
    /// Plain base-128 varint (negative values sign-extended to 10 bytes).
    #[default]
    Varint,
    /// Zigzag varint ("signed packing").
    ZigZag,
    /// Fixed-width little-endian.
    Fixed,
}

/// Decimal encoding variant, fixed at model-build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecimalFormat {
    /// Sub-message of mantissa halves and sign-scale (legacy binary).
    #[default]
    Halves,
    /// Canonical decimal string.
    Text,
}

/// Guid encoding variant, fixed at model-build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuidFormat {
    /// Sub-message of two fixed64 halves; empty guid is a zero-length body.
    #[default]
    Binary,
    /// Canonical hyphenated string.
    Text,
}

/// DateTime/Duration encoding variant, fixed at model-build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemporalFormat {
    /// Zigzag varint of 100 ns ticks.
    #[default]
    LegacyTicks,
    /// Sub-message of zigzag seconds and varint nanos.
    Timestamp,
}

/// The closed set of leaf serializers.
///
/// Leaves replace, never merge: `requires_old_value` is false for every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    Bool,
    I32(ScalarFormat),
    I64(ScalarFormat),
    U32(ScalarFormat),
    U64(ScalarFormat),
    F32,
    F64,
    Str,
    Bytes,
    Decimal(DecimalFormat),
    Guid(GuidFormat),
    DateTime(TemporalFormat),
    Duration(TemporalFormat),
    /// A type identifier carried as its registered name string.
    TypeName,
    /// An enum value mapped through a registered descriptor.
    Enum(EnumId),
}

impl LeafKind {
    /// The wire type this leaf's payload is encoded with.
    #[must_use]
    pub fn wire_type(&self) -> WireType {
        match self {
            LeafKind::Bool => WireType::Varint,
            LeafKind::I32(f) | LeafKind::U32(f) => match f {
                ScalarFormat::Fixed => WireType::Fixed32,
                _ => WireType::Varint,
            },
            LeafKind::I64(f) | LeafKind::U64(f) => match f {
                ScalarFormat::Fixed => WireType::Fixed64,
                _ => WireType::Varint,
            },
            LeafKind::F32 => WireType::Fixed32,
            LeafKind::F64 => WireType::Fixed64,
            LeafKind::Str | LeafKind::Bytes | LeafKind::TypeName => WireType::LengthDelimited,
            LeafKind::Decimal(DecimalFormat::Text) | LeafKind::Guid(GuidFormat::Text) => {
                WireType::LengthDelimited
            }
            LeafKind::Decimal(DecimalFormat::Halves) | LeafKind::Guid(GuidFormat::Binary) => {
                WireType::LengthDelimited
            }
            LeafKind::DateTime(TemporalFormat::LegacyTicks)
            | LeafKind::Duration(TemporalFormat::LegacyTicks) => WireType::Varint,
            LeafKind::DateTime(TemporalFormat::Timestamp)
            | LeafKind::Duration(TemporalFormat::Timestamp) => WireType::LengthDelimited,
            LeafKind::Enum(_) => WireType::Varint,
        }
    }

    /// Whether elements of this kind may be packed (concatenated payloads
    /// with no per-element headers). Only self-delimiting payloads qualify.
    #[must_use]
    pub fn packable(&self) -> bool {
        !matches!(self.wire_type(), WireType::LengthDelimited)
    }

    /// The implicit default value carried when a field of this kind is
    /// absent from the stream.
    #[must_use]
    pub fn implicit_default(&self) -> Value {
        match self {
            LeafKind::Bool => Value::Bool(false),
            LeafKind::I32(_) => Value::I32(0),
            LeafKind::I64(_) => Value::I64(0),
            LeafKind::U32(_) => Value::U32(0),
            LeafKind::U64(_) => Value::U64(0),
            LeafKind::F32 => Value::F32(0.0),
            LeafKind::F64 => Value::F64(0.0),
            LeafKind::Str => Value::String(String::new()),
            LeafKind::TypeName => Value::TypeName(String::new()),
            LeafKind::Bytes => Value::Bytes(Vec::new()),
            LeafKind::Decimal(_) => Value::Decimal(Decimal::default()),
            LeafKind::Guid(_) => Value::Guid(Guid::EMPTY),
            LeafKind::DateTime(_) => Value::DateTime(DateTime::default()),
            LeafKind::Duration(_) => Value::Duration(Duration::default()),
            LeafKind::Enum(_) => Value::Enum(0),
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            LeafKind::Bool => "bool",
            LeafKind::I32(_) => "i32",
            LeafKind::I64(_) => "i64",
            LeafKind::U32(_) => "u32",
            LeafKind::U64(_) => "u64",
            LeafKind::F32 => "f32",
            LeafKind::F64 => "f64",
            LeafKind::Str => "string",
            LeafKind::Bytes => "bytes",
            LeafKind::Decimal(_) => "decimal",
            LeafKind::Guid(_) => "guid",
            LeafKind::DateTime(_) => "datetime",
            LeafKind::Duration(_) => "duration",
            LeafKind::TypeName => "typename",
            LeafKind::Enum(_) => "enum",
        }
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::TypeMismatch {
            expected: self.expected(),
            found: value.kind_name(),
        }
    }
}

/// Write one leaf payload. The field header has already been written.
pub(crate) fn write_leaf(
    model: &Model,
    w: &mut WriterState,
    kind: &LeafKind,
    value: &Value,
) -> Result<()> {
    match (kind, value) {
        (LeafKind::Bool, Value::Bool(b)) => w.write_varint(u64::from(*b)),
        (LeafKind::I32(f), Value::I32(n)) => match f {
            ScalarFormat::Varint => w.write_varint(i64::from(*n) as u64),
            ScalarFormat::ZigZag => w.write_varint(u64::from(wire::zigzag32(*n))),
            ScalarFormat::Fixed => w.write_fixed32(*n as u32),
        },
        (LeafKind::I64(f), Value::I64(n)) => match f {
            ScalarFormat::Varint => w.write_varint(*n as u64),
            ScalarFormat::ZigZag => w.write_varint(wire::zigzag64(*n)),
            ScalarFormat::Fixed => w.write_fixed64(*n as u64),
        },
        (LeafKind::U32(f), Value::U32(n)) => match f {
            ScalarFormat::Fixed => w.write_fixed32(*n),
            _ => w.write_varint(u64::from(*n)),
        },
        (LeafKind::U64(f), Value::U64(n)) => match f {
            ScalarFormat::Fixed => w.write_fixed64(*n),
            _ => w.write_varint(*n),
        },
        (LeafKind::F32, Value::F32(v)) => w.write_fixed32(v.to_bits()),
        (LeafKind::F64, Value::F64(v)) => w.write_fixed64(v.to_bits()),
        (LeafKind::Str, Value::String(s)) | (LeafKind::TypeName, Value::TypeName(s)) => {
            w.write_length_delimited(s.as_bytes());
        }
        (LeafKind::Bytes, Value::Bytes(b)) => w.write_length_delimited(b),
        (LeafKind::Decimal(DecimalFormat::Halves), Value::Decimal(d)) => {
            let (lo, hi, sign_scale) = d.to_halves();
            let token = w.start_length_sub_item()?;
            if lo != 0 {
                w.write_header(1, WireType::Varint);
                w.write_varint(lo);
            }
            if hi != 0 {
                w.write_header(2, WireType::Varint);
                w.write_varint(hi);
            }
            if sign_scale != 0 {
                w.write_header(3, WireType::Varint);
                w.write_varint(sign_scale);
            }
            w.end_sub_item(token)?;
        }
        (LeafKind::Decimal(DecimalFormat::Text), Value::Decimal(d)) => {
            w.write_length_delimited(d.to_string().as_bytes());
        }
        (LeafKind::Guid(GuidFormat::Binary), Value::Guid(g)) => {
            let token = w.start_length_sub_item()?;
            if !g.is_empty() {
                let (lo, hi) = g.to_halves();
                w.write_header(1, WireType::Fixed64);
                w.write_fixed64(lo);
                w.write_header(2, WireType::Fixed64);
                w.write_fixed64(hi);
            }
            w.end_sub_item(token)?;
        }
        (LeafKind::Guid(GuidFormat::Text), Value::Guid(g)) => {
            w.write_length_delimited(g.to_string().as_bytes());
        }
        (LeafKind::DateTime(TemporalFormat::LegacyTicks), Value::DateTime(dt)) => {
            let ticks = dt.to_ticks().ok_or(Error::OutOfRange {
                what: "datetime ticks",
            })?;
            w.write_varint(wire::zigzag64(ticks));
        }
        (LeafKind::Duration(TemporalFormat::LegacyTicks), Value::Duration(d)) => {
            let ticks = d.to_ticks().ok_or(Error::OutOfRange {
                what: "duration ticks",
            })?;
            w.write_varint(wire::zigzag64(ticks));
        }
        (LeafKind::DateTime(TemporalFormat::Timestamp), Value::DateTime(dt)) => {
            write_timestamp_body(w, dt.seconds, dt.nanos)?;
        }
        (LeafKind::Duration(TemporalFormat::Timestamp), Value::Duration(d)) => {
            write_timestamp_body(w, d.seconds, d.nanos)?;
        }
        (LeafKind::Enum(id), value) => {
            let host = value.as_i64().ok_or_else(|| kind.mismatch(value))?;
            let wire_value = model.enum_wire_value(*id, host)?;
            w.write_varint(wire_value as u64);
        }
        (kind, value) => return Err(kind.mismatch(value)),
    }
    Ok(())
}

fn write_timestamp_body(w: &mut WriterState, seconds: i64, nanos: u32) -> Result<()> {
    let token = w.start_length_sub_item()?;
    if seconds != 0 {
        w.write_header(1, WireType::Varint);
        w.write_varint(wire::zigzag64(seconds));
    }
    if nanos != 0 {
        w.write_header(2, WireType::Varint);
        w.write_varint(u64::from(nanos));
    }
    w.end_sub_item(token)
}

/// Read one leaf payload of the expected wire type.
///
/// Leaves replace rather than merge, so `existing` must be absent; the debug
/// assertion catches caller protocol violations early.
pub(crate) fn read_leaf(
    model: &Model,
    r: &mut ReaderState<'_>,
    kind: &LeafKind,
    existing: Option<&Value>,
) -> Result<Value> {
    debug_assert!(
        existing.map_or(true, Value::is_null),
        "leaf read handed a previous value"
    );
    r.check_wire(kind.wire_type())?;
    read_leaf_payload(model, r, kind)
}

/// Read one leaf payload with no wire-type check. Packed element runs use
/// this directly: elements inside a packed region carry no headers.
pub(crate) fn read_leaf_payload(
    model: &Model,
    r: &mut ReaderState<'_>,
    kind: &LeafKind,
) -> Result<Value> {
    let value = match kind {
        LeafKind::Bool => Value::Bool(r.read_varint_payload()? != 0),
        LeafKind::I32(f) => Value::I32(match f {
            ScalarFormat::Varint => {
                // Negative values arrive sign-extended to 64 bits; anything
                // else past 32 bits is malformed.
                let raw = r.read_varint_payload()?;
                i32::try_from(raw as i64).map_err(|_| Error::MalformedVarint(r.context()))?
            }
            ScalarFormat::ZigZag => {
                let raw = r.read_varint_payload()?;
                let narrow =
                    u32::try_from(raw).map_err(|_| Error::MalformedVarint(r.context()))?;
                wire::unzigzag32(narrow)
            }
            ScalarFormat::Fixed => r.read_fixed32_payload()? as i32,
        }),
        LeafKind::I64(f) => Value::I64(match f {
            ScalarFormat::Varint => r.read_varint_payload()? as i64,
            ScalarFormat::ZigZag => wire::unzigzag64(r.read_varint_payload()?),
            ScalarFormat::Fixed => r.read_fixed64_payload()? as i64,
        }),
        LeafKind::U32(f) => Value::U32(match f {
            ScalarFormat::Fixed => r.read_fixed32_payload()?,
            _ => {
                let raw = r.read_varint_payload()?;
                u32::try_from(raw).map_err(|_| Error::MalformedVarint(r.context()))?
            }
        }),
        LeafKind::U64(f) => Value::U64(match f {
            ScalarFormat::Fixed => r.read_fixed64_payload()?,
            _ => r.read_varint_payload()?,
        }),
        LeafKind::F32 => Value::F32(f32::from_bits(r.read_fixed32_payload()?)),
        LeafKind::F64 => Value::F64(f64::from_bits(r.read_fixed64_payload()?)),
        LeafKind::Str => Value::String(r.read_string_payload()?.to_owned()),
        LeafKind::TypeName => Value::TypeName(r.read_string_payload()?.to_owned()),
        LeafKind::Bytes => Value::Bytes(r.read_bytes_payload()?.to_vec()),
        LeafKind::Decimal(DecimalFormat::Halves) => {
            let token = r.start_sub_item()?;
            let (mut lo, mut hi, mut sign_scale) = (0u64, 0u64, 0u64);
            loop {
                match r.read_field_header()? {
                    0 => break,
                    1 => {
                        r.check_wire(WireType::Varint)?;
                        lo = r.read_varint_payload()?;
                    }
                    2 => {
                        r.check_wire(WireType::Varint)?;
                        hi = r.read_varint_payload()?;
                    }
                    3 => {
                        r.check_wire(WireType::Varint)?;
                        sign_scale = r.read_varint_payload()?;
                    }
                    _ => r.skip_field()?,
                }
            }
            r.end_sub_item(token)?;
            Value::Decimal(Decimal::from_halves(lo, hi, sign_scale))
        }
        LeafKind::Decimal(DecimalFormat::Text) => {
            let context = r.context();
            let text = r.read_string_payload()?;
            Value::Decimal(Decimal::parse(text).ok_or(Error::TruncatedOrCorrupt(context))?)
        }
        LeafKind::Guid(GuidFormat::Binary) => {
            let token = r.start_sub_item()?;
            let (mut lo, mut hi) = (0u64, 0u64);
            loop {
                match r.read_field_header()? {
                    0 => break,
                    1 => {
                        r.check_wire(WireType::Fixed64)?;
                        lo = r.read_fixed64_payload()?;
                    }
                    2 => {
                        r.check_wire(WireType::Fixed64)?;
                        hi = r.read_fixed64_payload()?;
                    }
                    _ => r.skip_field()?,
                }
            }
            r.end_sub_item(token)?;
            Value::Guid(Guid::from_halves(lo, hi))
        }
        LeafKind::Guid(GuidFormat::Text) => {
            let context = r.context();
            let text = r.read_string_payload()?;
            Value::Guid(Guid::parse(text).ok_or(Error::TruncatedOrCorrupt(context))?)
        }
        LeafKind::DateTime(TemporalFormat::LegacyTicks) => Value::DateTime(DateTime::from_ticks(
            wire::unzigzag64(r.read_varint_payload()?),
        )),
        LeafKind::Duration(TemporalFormat::LegacyTicks) => Value::Duration(Duration::from_ticks(
            wire::unzigzag64(r.read_varint_payload()?),
        )),
        LeafKind::DateTime(TemporalFormat::Timestamp) => {
            let (seconds, nanos) = read_timestamp_body(r)?;
            Value::DateTime(DateTime::new(seconds, nanos))
        }
        LeafKind::Duration(TemporalFormat::Timestamp) => {
            let (seconds, nanos) = read_timestamp_body(r)?;
            Value::Duration(Duration::new(seconds, nanos))
        }
        LeafKind::Enum(id) => {
            let raw = r.read_varint_payload()? as i64;
            Value::Enum(model.enum_host_value(*id, raw)?)
        }
    };
    Ok(value)
}

fn read_timestamp_body(r: &mut ReaderState<'_>) -> Result<(i64, u32)> {
    let token = r.start_sub_item()?;
    let (mut seconds, mut nanos) = (0i64, 0u32);
    loop {
        match r.read_field_header()? {
            0 => break,
            1 => {
                r.check_wire(WireType::Varint)?;
                seconds = wire::unzigzag64(r.read_varint_payload()?);
            }
            2 => {
                r.check_wire(WireType::Varint)?;
                let raw = r.read_varint_payload()?;
                nanos = u32::try_from(raw).map_err(|_| Error::MalformedVarint(r.context()))?;
            }
            _ => r.skip_field()?,
        }
    }
    r.end_sub_item(token)?;
    Ok((seconds, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, ModelOptions};

    fn empty_model() -> Model {
        Model::empty_for_tests()
    }

    fn roundtrip(kind: LeafKind, value: Value) -> Value {
        let model = empty_model();
        let mut w = WriterState::new(64);
        // The caller owns the header; write one so the reader has a wire type.
        w.write_header(1, kind.wire_type());
        write_leaf(&model, &mut w, &kind, &value).unwrap();
        let bytes = w.into_bytes().unwrap();
        let mut r = ReaderState::new(&bytes, &ModelOptions::default());
        assert_eq!(r.read_field_header().unwrap(), 1);
        read_leaf(&model, &mut r, &kind, None).unwrap()
    }

    #[test]
    fn test_scalar_roundtrips() {
        for format in [ScalarFormat::Varint, ScalarFormat::ZigZag, ScalarFormat::Fixed] {
            for v in [0i32, 1, -1, i32::MAX, i32::MIN, 300, -300] {
                assert_eq!(roundtrip(LeafKind::I32(format), Value::I32(v)), Value::I32(v));
            }
            for v in [0i64, -1, i64::MAX, i64::MIN, 1 << 40] {
                assert_eq!(roundtrip(LeafKind::I64(format), Value::I64(v)), Value::I64(v));
            }
        }
        assert_eq!(roundtrip(LeafKind::Bool, Value::Bool(true)), Value::Bool(true));
        assert_eq!(
            roundtrip(LeafKind::U64(ScalarFormat::Varint), Value::U64(u64::MAX)),
            Value::U64(u64::MAX)
        );
        assert_eq!(
            roundtrip(LeafKind::U32(ScalarFormat::Fixed), Value::U32(u32::MAX)),
            Value::U32(u32::MAX)
        );
    }

    #[test]
    fn test_float_roundtrips() {
        assert_eq!(
            roundtrip(LeafKind::F32, Value::F32(1.25)),
            Value::F32(1.25)
        );
        assert_eq!(
            roundtrip(LeafKind::F64, Value::F64(-0.0)),
            Value::F64(-0.0)
        );
        // NaN round-trips bit-exactly; Value equality compares bits.
        let nan = f64::from_bits(0x7ff8_0000_0000_0001);
        assert_eq!(roundtrip(LeafKind::F64, Value::F64(nan)), Value::F64(nan));
    }

    #[test]
    fn test_string_bytes_roundtrips() {
        assert_eq!(
            roundtrip(LeafKind::Str, Value::from("héllo")),
            Value::from("héllo")
        );
        assert_eq!(
            roundtrip(LeafKind::Bytes, Value::Bytes(vec![0, 1, 255])),
            Value::Bytes(vec![0, 1, 255])
        );
        assert_eq!(
            roundtrip(LeafKind::Bytes, Value::Bytes(Vec::new())),
            Value::Bytes(Vec::new())
        );
    }

    #[test]
    fn test_decimal_variants() {
        let d = Value::Decimal(Decimal::new(-1234567890123456789012345678i128, 7));
        assert_eq!(roundtrip(LeafKind::Decimal(DecimalFormat::Halves), d.clone()), d);
        assert_eq!(roundtrip(LeafKind::Decimal(DecimalFormat::Text), d.clone()), d);
    }

    #[test]
    fn test_guid_layout() {
        let model = empty_model();
        let g = Guid([1; 16]);
        let mut w = WriterState::new(64);
        w.write_header(1, WireType::LengthDelimited);
        write_leaf(&model, &mut w, &LeafKind::Guid(GuidFormat::Binary), &Value::Guid(g)).unwrap();
        let bytes = w.into_bytes().unwrap();
        // header + len + two (header + fixed64) fields = 1 + 1 + 18.
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes[1], 18);

        let mut w = WriterState::new(64);
        w.write_header(1, WireType::LengthDelimited);
        write_leaf(
            &model,
            &mut w,
            &LeafKind::Guid(GuidFormat::Binary),
            &Value::Guid(Guid::EMPTY),
        )
        .unwrap();
        let bytes = w.into_bytes().unwrap();
        // Empty guid: header + zero-length payload.
        assert_eq!(bytes, vec![0x0a, 0x00]);

        for variant in [GuidFormat::Binary, GuidFormat::Text] {
            assert_eq!(
                roundtrip(LeafKind::Guid(variant), Value::Guid(g)),
                Value::Guid(g)
            );
            assert_eq!(
                roundtrip(LeafKind::Guid(variant), Value::Guid(Guid::EMPTY)),
                Value::Guid(Guid::EMPTY)
            );
        }
    }

    #[test]
    fn test_temporal_variants() {
        let dt = Value::DateTime(DateTime::new(1_700_000_000, 123_456_700));
        let du = Value::Duration(Duration::new(-5, 500));
        for variant in [TemporalFormat::LegacyTicks, TemporalFormat::Timestamp] {
            assert_eq!(roundtrip(LeafKind::DateTime(variant), dt.clone()), dt);
            assert_eq!(roundtrip(LeafKind::Duration(variant), du.clone()), du);
        }
    }

    #[test]
    fn test_varint_wider_than_target_rejected() {
        let model = empty_model();
        let wide = u64::from(u32::MAX) + 2;
        let mut w = WriterState::new(64);
        w.write_header(1, WireType::Varint);
        w.write_varint(wide);
        let bytes = w.into_bytes().unwrap();

        for kind in [
            LeafKind::U32(ScalarFormat::Varint),
            LeafKind::I32(ScalarFormat::Varint),
            LeafKind::I32(ScalarFormat::ZigZag),
        ] {
            let mut r = ReaderState::new(&bytes, &ModelOptions::default());
            assert_eq!(r.read_field_header().unwrap(), 1);
            let err = read_leaf(&model, &mut r, &kind, None).unwrap_err();
            assert!(matches!(err, Error::MalformedVarint(_)));
        }

        // Sign-extended negatives still fit a 32-bit target.
        assert_eq!(
            roundtrip(LeafKind::I32(ScalarFormat::Varint), Value::I32(-1)),
            Value::I32(-1)
        );
    }

    #[test]
    fn test_ticks_overflow_rejected() {
        let model = empty_model();
        let mut w = WriterState::new(64);
        let err = write_leaf(
            &model,
            &mut w,
            &LeafKind::DateTime(TemporalFormat::LegacyTicks),
            &Value::DateTime(DateTime::new(i64::MAX, 0)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
    }

    #[test]
    fn test_type_mismatch() {
        let model = empty_model();
        let mut w = WriterState::new(64);
        let err = write_leaf(&model, &mut w, &LeafKind::Bool, &Value::I32(1)).unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                expected: "bool",
                found: "i32"
            }
        ));
    }
}
