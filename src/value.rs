//! Typed values appearing in query result records.

use chrono::{DateTime, FixedOffset};
use ordered_float::OrderedFloat;

/// A single cell of a query result, carrying the type declared by the
/// table's `#datatype` annotation.
///
/// `Null` stands for an empty cell whose column default is also empty.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// String value.
    String(String),
    /// 64-bit floating point value.
    Double(OrderedFloat<f64>),
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Long(i64),
    /// Unsigned 64-bit integer.
    UnsignedLong(u64),
    /// Duration with nanosecond resolution.
    Duration(chrono::Duration),
    /// Decoded `base64Binary` payload.
    Bytes(Vec<u8>),
    /// RFC3339 timestamp with timezone.
    Time(DateTime<FixedOffset>),
    /// Empty cell.
    Null,
}

impl Value {
    /// String slice if this is a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Owned string if this is a `String` value.
    pub fn string(&self) -> Option<String> {
        self.as_str().map(str::to_owned)
    }

    /// `f64` if this is a `Double` value.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(f.into_inner()),
            _ => None,
        }
    }

    /// `bool` if this is a `Bool` value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// `i64` if this is a `Long` value.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(i) => Some(*i),
            _ => None,
        }
    }

    /// `u64` if this is an `UnsignedLong` value.
    pub fn as_unsigned_long(&self) -> Option<u64> {
        match self {
            Value::UnsignedLong(u) => Some(*u),
            _ => None,
        }
    }

    /// Duration if this is a `Duration` value.
    pub fn as_duration(&self) -> Option<chrono::Duration> {
        match self {
            Value::Duration(d) => Some(*d),
            _ => None,
        }
    }

    /// Byte slice if this is a `Bytes` value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Timestamp if this is a `Time` value.
    pub fn as_time(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Value::Time(t) => Some(t),
            _ => None,
        }
    }

    /// True if the cell was empty.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Double(d) => write!(f, "{}", d),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Long(i) => write!(f, "{}", i),
            Value::UnsignedLong(u) => write!(f, "{}", u),
            Value::Duration(d) => write!(f, "{}ns", d.num_nanoseconds().unwrap_or(0)),
            Value::Bytes(b) => write!(f, "<binary {} bytes>", b.len()),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Null => write!(f, "null"),
        }
    }
}
