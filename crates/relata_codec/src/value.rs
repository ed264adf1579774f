//! Dynamic attribute value.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A record attribute value.
///
/// Integers are signed 64-bit. Composite values are nested value objects:
/// they have fields but no identity of their own. Variants are tagged
/// unions: a case name plus its positional payload, empty for plain cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value.
    Null,
    /// UTF-8 text.
    String(String),
    /// Signed integer.
    Integer(i64),
    /// Double-precision float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Point in time, UTC.
    Timestamp(DateTime<Utc>),
    /// Opaque byte blob.
    Bytes(Vec<u8>),
    /// UUID.
    Uuid(Uuid),
    /// Arbitrary-precision decimal.
    Decimal(Decimal),
    /// Homogeneous list.
    List(Vec<Value>),
    /// Nested value object, keyed by field name.
    Composite(BTreeMap<String, Value>),
    /// One case of an enumeration.
    Variant {
        /// Case name.
        case: String,
        /// Associated values, in declaration order.
        payload: Vec<Value>,
    },
}

impl Value {
    /// Returns a short name for the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Timestamp(_) => "timestamp",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Decimal(_) => "decimal",
            Value::List(_) => "list",
            Value::Composite(_) => "composite",
            Value::Variant { .. } => "variant",
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the text if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float if this is one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the boolean if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the field map if this is a composite.
    #[must_use]
    pub fn as_composite(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Composite(fields) => Some(fields),
            _ => None,
        }
    }

    /// Returns the case name and payload if this is a variant.
    #[must_use]
    pub fn as_variant(&self) -> Option<(&str, &[Value])> {
        match self {
            Value::Variant { case, payload } => Some((case, payload)),
            _ => None,
        }
    }

    /// A variant with no payload.
    pub fn case(case: impl Into<String>) -> Self {
        Value::Variant {
            case: case.into(),
            payload: Vec::new(),
        }
    }

    /// A variant carrying `payload`.
    pub fn variant<I>(case: impl Into<String>, payload: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Value::Variant {
            case: case.into(),
            payload: payload.into_iter().collect(),
        }
    }

    /// Builds a composite from `(name, value)` pairs.
    pub fn composite<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Composite(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Total order used for sorting and range predicates.
    ///
    /// `Null` sorts first. Integers and floats compare numerically with each
    /// other; floats use IEEE total ordering. Values of unrelated types order
    /// by variant.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => compare_seq(a, b),
            (Value::Composite(a), Value::Composite(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                    let ord = ka.cmp(kb).then_with(|| va.compare(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (
                Value::Variant { case: ca, payload: pa },
                Value::Variant { case: cb, payload: pb },
            ) => ca.cmp(cb).then_with(|| compare_seq(pa, pb)),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Decimal(_) => 3,
            Value::String(_) => 4,
            Value::Timestamp(_) => 5,
            Value::Uuid(_) => 6,
            Value::Bytes(_) => 7,
            Value::List(_) => 8,
            Value::Composite(_) => 9,
            Value::Variant { .. } => 10,
        }
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = x.compare(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
