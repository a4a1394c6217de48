mod compare;
mod hash;
mod map;
mod rank;
mod tag;


use crate::error::{Error, ErrorOrigin};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt;
use time::{
    OffsetDateTime, format_description::well_known::Rfc3339,
};

// re-exports
pub use compare::{canonical_cmp, is_equal};
pub use hash::{ValueHasher, Xxh3Hasher, hash_value};
pub use map::{
    ValueMap, intersection, intersection_with_hasher, unique, unique_with_hasher,
};
pub use tag::ValueTag;

/// Nested key/value document: the unit of data flowing through a pipeline.
///
/// A document is a `Value::Object` by construction; the alias keeps stage
/// signatures readable without introducing a second tree type.
pub type Document = Value;

/// Integer window within which an `i64 -> f64` cast is lossless.
const F64_SAFE_I64: i64 = 1i64 << 53;

///
/// Value
///
/// One runtime value flowing through the pipeline. Every value belongs to
/// exactly one of 12 ranked categories; `Int` and `Float` share the number
/// category and compare numerically.
///
/// `Absent` marks a field/key that does not exist — distinct from `Null`,
/// which is a present field holding no value.
///

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Absent,
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Symbol(String),
    Object(IndexMap<String, Value>),
    Array(Vec<Value>),
    Bytes(Vec<u8>),
    Bool(bool),
    Date(Date),
    Pattern(Pattern),
    Func(NativeFn),
}

impl Value {
    ///
    /// CONSTRUCTION
    ///

    /// Build a `Value::Array` from owned items.
    pub fn from_list<T>(items: Vec<T>) -> Self
    where
        T: Into<Self>,
    {
        Self::Array(items.into_iter().map(Into::into).collect())
    }

    /// Build a `Value::Array` from a slice of convertible items.
    ///
    /// Intended for tests and inline construction.
    pub fn from_slice<T>(items: &[T]) -> Self
    where
        T: Into<Self> + Clone,
    {
        Self::Array(items.iter().cloned().map(Into::into).collect())
    }

    ///
    /// TYPES
    ///

    /// Returns true for the number category (`Int` or `Float`).
    #[must_use]
    pub const fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Returns true when the value counts as "nil" for the soft edge-case
    /// rules: a missing field or an explicit null.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Absent | Self::Null)
    }

    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    #[must_use]
    pub const fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    #[must_use]
    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Stable canonical variant tag used by hash encodings.
    #[must_use]
    pub(crate) const fn canonical_tag(&self) -> ValueTag {
        tag::canonical_tag(self)
    }

    /// Stable canonical rank used by all cross-category ordering surfaces.
    ///
    /// `Absent` ranks with `Null`; the distinction survives only in the tag.
    #[must_use]
    pub(crate) const fn canonical_rank(&self) -> u8 {
        rank::canonical_rank(self)
    }

    /// Stable human-readable kind label for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.canonical_tag().label()
    }

    ///
    /// CONVERSION
    ///

    #[must_use]
    pub const fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Symbol(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_array(&self) -> Option<&[Self]> {
        if let Self::Array(items) = self {
            Some(items.as_slice())
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&IndexMap<String, Self>> {
        if let Self::Object(fields) = self {
            Some(fields)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    /// Numeric view of the value; `None` for every non-number category.
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view; exact for `Int`, integral in-range `Float` only.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f)
                if f.fract() == 0.0 && (-(F64_SAFE_I64 as f64)..=F64_SAFE_I64 as f64).contains(f) =>
            {
                Some(*f as i64)
            }
            _ => None,
        }
    }

    /// Numeric view skipping NaN; the filter used by min/max scans.
    #[must_use]
    pub fn as_ordered_f64(&self) -> Option<f64> {
        self.as_f64().filter(|f| !f.is_nan())
    }

    ///
    /// JSON BRIDGE
    ///

    /// Build a value from plain JSON. Numbers stay integers when they fit.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || Self::Float(n.as_f64().unwrap_or(f64::NAN)),
                Self::Int,
            ),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(fields) => Self::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render the value as plain JSON.
    ///
    /// Absent collapses to null; the non-JSON categories use tagged object
    /// encodings (`$symbol`, `$date`, `$regex`) so no information silently
    /// disappears. Callables have no encoding and render as null.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Absent | Self::Null | Self::Func(_) => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Symbol(s) => serde_json::json!({ "$symbol": s }),
            Self::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .filter(|(_, v)| !v.is_absent())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Bytes(bytes) => serde_json::Value::Array(
                bytes.iter().map(|b| serde_json::Value::from(*b)).collect(),
            ),
            Self::Date(d) => serde_json::json!({ "$date": d.format_rfc3339() }),
            Self::Pattern(p) => serde_json::json!({ "$regex": p.source, "$options": p.flags }),
        }
    }
}

// Equality is the deep structural equality of the value model, not a derived
// variant-wise comparison: Int(5) == Float(5.0), NaN != NaN.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        is_equal(self, other)
    }
}

// Strict same-instant / same-rank ordering only; cross-category comparisons
// go through `canonical_cmp`, which is total.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.canonical_rank() == other.canonical_rank() {
            Some(canonical_cmp(self, other))
        } else {
            None
        }
    }
}

macro_rules! impl_from_for {
    ( $( $type:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$type> for Value {
                fn from(v: $type) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for! {
    bool    => Bool,
    i8      => Int,
    i16     => Int,
    i32     => Int,
    i64     => Int,
    u8      => Int,
    u16     => Int,
    u32     => Int,
    f32     => Float,
    f64     => Float,
    &str    => Text,
    String  => Text,
    Date    => Date,
    Pattern => Pattern,
}

impl From<Vec<Self>> for Value {
    fn from(vec: Vec<Self>) -> Self {
        Self::Array(vec)
    }
}

impl From<IndexMap<String, Self>> for Value {
    fn from(fields: IndexMap<String, Self>) -> Self {
        Self::Object(fields)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        Self::from_json(json)
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(&json))
    }
}

///
/// Date
///
/// Instant in time; ordering and equality are offset-aware instant
/// comparisons, so two encodings of the same moment are one value.
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Date(OffsetDateTime);

impl Date {
    #[must_use]
    pub const fn new(instant: OffsetDateTime) -> Self {
        Self(instant)
    }

    pub fn from_unix_millis(millis: i64) -> Result<Self, Error> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
            .map(Self)
            .map_err(|err| Error::data(ErrorOrigin::Value, format!("date out of range: {err}")))
    }

    #[must_use]
    pub const fn unix_millis(&self) -> i64 {
        (self.0.unix_timestamp_nanos() / 1_000_000) as i64
    }

    #[must_use]
    pub const fn unix_nanos(&self) -> i128 {
        self.0.unix_timestamp_nanos()
    }

    pub fn parse_rfc3339(text: &str) -> Result<Self, Error> {
        OffsetDateTime::parse(text, &Rfc3339)
            .map(Self)
            .map_err(|err| Error::data(ErrorOrigin::Value, format!("invalid date '{text}': {err}")))
    }

    #[must_use]
    pub fn format_rfc3339(&self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.unix_millis().to_string())
    }
}

///
/// Pattern
///
/// Regular-expression value. The engine stores source + flags only; equality
/// and ordering are source-based, matching the pattern category contract.
///

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Pattern {
    pub source: String,
    pub flags: String,
}

impl Pattern {
    #[must_use]
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: flags.into(),
        }
    }
}

///
/// NativeFn
///
/// Callable host function carried as a value. Identity semantics: two
/// callables are equal only when they are the same function. There is no
/// canonical encoding, so hashing a callable is a fatal error.
///

#[derive(Clone, Copy)]
pub struct NativeFn {
    pub name: &'static str,
    pub call: fn(&[Value]) -> Result<Value, Error>,
}

impl NativeFn {
    #[must_use]
    pub const fn new(name: &'static str, call: fn(&[Value]) -> Result<Value, Error>) -> Self {
        Self { name, call }
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({})", self.name)
    }
}

impl PartialEq for NativeFn {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::fn_addr_eq(self.call, other.call) && self.name == other.name
    }
}
