// ABOUTME: Dynamic value model for protograph: Value, Record and the leaf payload types.
// ABOUTME: Records are Rc-shared so object graphs can alias and reference themselves.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Identifier of a message type registered in a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub(crate) usize);

/// Identifier of an enum descriptor registered in a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumId(pub(crate) usize);

/// A shared, aliasable message instance.
pub type RecordRef = Rc<RefCell<Record>>;

/// One message instance: its concrete type plus one value slot per bound member.
///
/// `extensions` holds unknown fields captured verbatim (header and payload)
/// during a read of an extensible type, re-emitted on the next write.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub type_id: Option<TypeId>,
    pub slots: Vec<Value>,
    pub extensions: Vec<u8>,
}

impl Record {
    /// Create a record of `type_id` with `slot_count` null slots.
    #[must_use]
    pub fn new(type_id: TypeId, slot_count: usize) -> Self {
        Self {
            type_id: Some(type_id),
            slots: vec![Value::Null; slot_count],
            extensions: Vec::new(),
        }
    }

    /// Wrap this record in a shareable reference.
    #[must_use]
    pub fn into_ref(self) -> RecordRef {
        Rc::new(RefCell::new(self))
    }
}

/// A dynamic value processed by the engine.
///
/// This is the runtime stand-in for host objects: a model describes message
/// types, and instances of those types travel as `Value` trees. `Record`
/// values are `Rc`-shared so the same instance can appear in several places
/// of one graph (and, with reference tracking enabled, on the wire).
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Guid(Guid),
    DateTime(DateTime),
    Duration(Duration),
    /// A type identifier carried as its registered name.
    TypeName(String),
    /// An enum member carried as its underlying value.
    Enum(i64),
    List(Vec<Value>),
    Record(RecordRef),
}

impl Value {
    /// Returns true if this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A short name for the value's shape, used in mismatch diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Decimal(_) => "decimal",
            Value::Guid(_) => "guid",
            Value::DateTime(_) => "datetime",
            Value::Duration(_) => "duration",
            Value::TypeName(_) => "typename",
            Value::Enum(_) => "enum",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    /// If this is a boolean, returns it.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// If this is an i32, returns it.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(n) => Some(*n),
            _ => None,
        }
    }

    /// If this is an i64 (or i32), returns it widened.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(n) => Some(*n),
            Value::I32(n) => Some(i64::from(*n)),
            Value::Enum(n) => Some(*n),
            _ => None,
        }
    }

    /// If this is a string, returns a reference to it.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// If this is a list, returns a reference to it.
    #[must_use]
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// If this is a list, returns a mutable reference to it.
    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// If this is a record, returns a clone of the shared reference.
    #[must_use]
    pub fn as_record(&self) -> Option<RecordRef> {
        match self {
            Value::Record(r) => Some(Rc::clone(r)),
            _ => None,
        }
    }
}

// Equality compares record contents, not identity; identity comparisons go
// through Rc::ptr_eq at the call sites that need them.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::TypeName(a), Value::TypeName(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<RecordRef> for Value {
    fn from(v: RecordRef) -> Self {
        Value::Record(v)
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Value::List(iter.into_iter().map(Into::into).collect())
    }
}

/// A leaf-only value: the subset of [`Value`] a field default may hold.
/// No list or record variant exists, so no `Rc` is reachable through a
/// frozen model and models stay `Send + Sync`.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Guid(Guid),
    DateTime(DateTime),
    Duration(Duration),
    TypeName(String),
    Enum(i64),
}

impl LeafValue {
    /// Narrow a value to its leaf form; `None` for null, lists and records.
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Bool(v) => LeafValue::Bool(*v),
            Value::I32(v) => LeafValue::I32(*v),
            Value::I64(v) => LeafValue::I64(*v),
            Value::U32(v) => LeafValue::U32(*v),
            Value::U64(v) => LeafValue::U64(*v),
            Value::F32(v) => LeafValue::F32(*v),
            Value::F64(v) => LeafValue::F64(*v),
            Value::String(v) => LeafValue::String(v.clone()),
            Value::Bytes(v) => LeafValue::Bytes(v.clone()),
            Value::Decimal(v) => LeafValue::Decimal(*v),
            Value::Guid(v) => LeafValue::Guid(*v),
            Value::DateTime(v) => LeafValue::DateTime(*v),
            Value::Duration(v) => LeafValue::Duration(*v),
            Value::TypeName(v) => LeafValue::TypeName(v.clone()),
            Value::Enum(v) => LeafValue::Enum(*v),
            Value::Null | Value::List(_) | Value::Record(_) => return None,
        })
    }

    /// Widen back to a [`Value`].
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            LeafValue::Bool(v) => Value::Bool(*v),
            LeafValue::I32(v) => Value::I32(*v),
            LeafValue::I64(v) => Value::I64(*v),
            LeafValue::U32(v) => Value::U32(*v),
            LeafValue::U64(v) => Value::U64(*v),
            LeafValue::F32(v) => Value::F32(*v),
            LeafValue::F64(v) => Value::F64(*v),
            LeafValue::String(v) => Value::String(v.clone()),
            LeafValue::Bytes(v) => Value::Bytes(v.clone()),
            LeafValue::Decimal(v) => Value::Decimal(*v),
            LeafValue::Guid(v) => Value::Guid(*v),
            LeafValue::DateTime(v) => Value::DateTime(*v),
            LeafValue::Duration(v) => Value::Duration(*v),
            LeafValue::TypeName(v) => Value::TypeName(v.clone()),
            LeafValue::Enum(v) => Value::Enum(*v),
        }
    }

    /// Whether `value` equals this leaf. Floats compare by bits, matching
    /// [`Value`] equality.
    pub(crate) fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (LeafValue::Bool(a), Value::Bool(b)) => a == b,
            (LeafValue::I32(a), Value::I32(b)) => a == b,
            (LeafValue::I64(a), Value::I64(b)) => a == b,
            (LeafValue::U32(a), Value::U32(b)) => a == b,
            (LeafValue::U64(a), Value::U64(b)) => a == b,
            (LeafValue::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
            (LeafValue::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (LeafValue::String(a), Value::String(b)) => a == b,
            (LeafValue::Bytes(a), Value::Bytes(b)) => a == b,
            (LeafValue::Decimal(a), Value::Decimal(b)) => a == b,
            (LeafValue::Guid(a), Value::Guid(b)) => a == b,
            (LeafValue::DateTime(a), Value::DateTime(b)) => a == b,
            (LeafValue::Duration(a), Value::Duration(b)) => a == b,
            (LeafValue::TypeName(a), Value::TypeName(b)) => a == b,
            (LeafValue::Enum(a), Value::Enum(b)) => a == b,
            _ => false,
        }
    }
}

/// A fixed-point decimal: `mantissa * 10^-scale`, sign carried by the mantissa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decimal {
    pub mantissa: i128,
    pub scale: u32,
}

impl Decimal {
    /// Create a decimal from mantissa and scale.
    #[must_use]
    pub fn new(mantissa: i128, scale: u32) -> Self {
        Self { mantissa, scale }
    }

    /// Split into the wire halves: (low 64, high 64 of |mantissa|, sign-scale).
    #[must_use]
    pub(crate) fn to_halves(self) -> (u64, u64, u64) {
        let negative = self.mantissa < 0;
        let abs = self.mantissa.unsigned_abs();
        let lo = abs as u64;
        let hi = (abs >> 64) as u64;
        let sign_scale = (u64::from(self.scale) << 1) | u64::from(negative);
        (lo, hi, sign_scale)
    }

    /// Reassemble from the wire halves.
    #[must_use]
    pub(crate) fn from_halves(lo: u64, hi: u64, sign_scale: u64) -> Self {
        let abs = (u128::from(hi) << 64) | u128::from(lo);
        let mut mantissa = abs as i128;
        if sign_scale & 1 == 1 {
            mantissa = -mantissa;
        }
        Self {
            mantissa,
            scale: (sign_scale >> 1) as u32,
        }
    }

    /// Parse a canonical decimal string (as produced by `Display`).
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        let mut mantissa: i128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let d = c.to_digit(10)?;
            mantissa = mantissa.checked_mul(10)?.checked_add(i128::from(d))?;
        }
        if negative {
            mantissa = -mantissa;
        }
        Some(Self {
            mantissa,
            scale: frac_part.len() as u32,
        })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mantissa < 0 {
            write!(f, "-")?;
        }
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        if scale == 0 {
            return write!(f, "{digits}");
        }
        if digits.len() <= scale {
            write!(f, "0.")?;
            for _ in 0..scale - digits.len() {
                write!(f, "0")?;
            }
            write!(f, "{digits}")
        } else {
            let split = digits.len() - scale;
            write!(f, "{}.{}", &digits[..split], &digits[split..])
        }
    }
}

/// A 128-bit globally unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    /// The all-zero guid.
    pub const EMPTY: Guid = Guid([0; 16]);

    /// Returns true if every byte is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 16]
    }

    /// Split into two little-endian 64-bit halves.
    #[must_use]
    pub(crate) fn to_halves(self) -> (u64, u64) {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&self.0[..8]);
        hi.copy_from_slice(&self.0[8..]);
        (u64::from_le_bytes(lo), u64::from_le_bytes(hi))
    }

    /// Reassemble from two little-endian 64-bit halves.
    #[must_use]
    pub(crate) fn from_halves(lo: u64, hi: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&lo.to_le_bytes());
        bytes[8..].copy_from_slice(&hi.to_le_bytes());
        Guid(bytes)
    }

    /// Parse the canonical hyphenated lowercase form.
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let hex: String = text.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 || text.len() != 36 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(s, 16).ok()?;
        }
        Some(Guid(bytes))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

const NANOS_PER_TICK: i64 = 100;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// A point in time: seconds and nanoseconds relative to the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub seconds: i64,
    pub nanos: u32,
}

impl DateTime {
    /// Create from seconds and sub-second nanoseconds.
    #[must_use]
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Total 100 ns ticks since the epoch (legacy encoding); `None` when the
    /// seconds are outside the tick-representable range.
    pub(crate) fn to_ticks(self) -> Option<i64> {
        self.seconds
            .checked_mul(TICKS_PER_SECOND)?
            .checked_add(i64::from(self.nanos) / NANOS_PER_TICK)
    }

    /// Reassemble from 100 ns ticks.
    #[must_use]
    pub(crate) fn from_ticks(ticks: i64) -> Self {
        let seconds = ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK) as u32;
        Self { seconds, nanos }
    }
}

/// A span of time: seconds and nanoseconds, sign carried by `seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Duration {
    pub seconds: i64,
    pub nanos: u32,
}

impl Duration {
    /// Create from seconds and sub-second nanoseconds.
    #[must_use]
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Total 100 ns ticks (legacy encoding); `None` when the seconds are
    /// outside the tick-representable range.
    pub(crate) fn to_ticks(self) -> Option<i64> {
        self.seconds
            .checked_mul(TICKS_PER_SECOND)?
            .checked_add(i64::from(self.nanos) / NANOS_PER_TICK)
    }

    /// Reassemble from 100 ns ticks.
    #[must_use]
    pub(crate) fn from_ticks(ticks: i64) -> Self {
        let seconds = ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK) as u32;
        Self { seconds, nanos }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_display_parse() {
        let cases = [
            (Decimal::new(0, 0), "0"),
            (Decimal::new(12345, 2), "123.45"),
            (Decimal::new(-12345, 2), "-123.45"),
            (Decimal::new(5, 4), "0.0005"),
            (Decimal::new(-5, 4), "-0.0005"),
            (Decimal::new(100, 0), "100"),
        ];
        for (d, text) in cases {
            assert_eq!(d.to_string(), text);
            assert_eq!(Decimal::parse(text), Some(d));
        }
        assert_eq!(Decimal::parse(""), None);
        assert_eq!(Decimal::parse("12x"), None);
    }

    #[test]
    fn test_decimal_halves() {
        for d in [
            Decimal::new(0, 0),
            Decimal::new(-1, 0),
            Decimal::new(i128::from(u64::MAX) + 17, 5),
            Decimal::new(-(i128::from(u64::MAX) * 3), 1),
        ] {
            let (lo, hi, ss) = d.to_halves();
            assert_eq!(Decimal::from_halves(lo, hi, ss), d);
        }
    }

    #[test]
    fn test_guid_halves_and_text() {
        let g = Guid([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x10, 0x32, 0x54, 0x76, 0x98, 0xba,
            0xdc, 0xfe,
        ]);
        let (lo, hi) = g.to_halves();
        assert_eq!(Guid::from_halves(lo, hi), g);
        let text = g.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(Guid::parse(&text), Some(g));
        assert!(Guid::EMPTY.is_empty());
    }

    #[test]
    fn test_ticks_roundtrip() {
        for dt in [
            DateTime::new(0, 0),
            DateTime::new(1_700_000_000, 123_456_700),
            DateTime::new(-86_400, 500),
        ] {
            let rt = DateTime::from_ticks(dt.to_ticks().unwrap());
            assert_eq!(rt.seconds, dt.seconds);
            // Sub-tick precision is quantized to 100 ns.
            assert_eq!(rt.nanos, dt.nanos / 100 * 100);
        }
    }

    #[test]
    fn test_ticks_out_of_range() {
        assert_eq!(DateTime::new(i64::MAX, 0).to_ticks(), None);
        assert_eq!(Duration::new(i64::MIN / 2, 0).to_ticks(), None);
        assert!(Duration::new(-5, 500).to_ticks().is_some());
    }

    #[test]
    fn test_record_equality_vs_identity() {
        let a = Record::new(TypeId(0), 2).into_ref();
        let b = Record::new(TypeId(0), 2).into_ref();
        assert_eq!(Value::Record(a.clone()), Value::Record(b));
        assert!(!Rc::ptr_eq(&a, &Record::new(TypeId(0), 2).into_ref()));
    }
}
