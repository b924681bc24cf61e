//! The uniform data tree that templates are executed against.
//!
//! Any `Serialize` input is normalised into mappings, sequences and scalars.
//! Record fields become mapping entries (fields skipped by serde stay out),
//! `None` becomes `Null`, map keys become their `%v` text, signed integers
//! widen to `i64` and unsigned ones to `u64`.

mod ser;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, ErrorCode, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Date(DateTime<FixedOffset>),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// WordprocessingML produced by a helper; printed without escaping.
    Markup(String),
}

impl Value {
    /// Converts any serialisable value into a data tree.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        value
            .serialize(ser::ValueSerializer)
            .map_err(|e| Error::new(ErrorCode::DataConversion, e.to_string()).with_source(e))
    }

    /// Name of the value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Date(_) => "time",
            Value::Seq(_) => "slice",
            Value::Map(_) => "map",
            Value::Markup(_) => "markup",
        }
    }

    /// False, zero, empty text, nil and empty collections are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Uint(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) | Value::Markup(s) => !s.is_empty(),
            Value::Date(_) => true,
            Value::Seq(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Uint(_) | Value::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Uint(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Uint(n) => i64::try_from(*n).ok(),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Markup(s) => Some(s),
            _ => None,
        }
    }

    /// Number of elements, bytes of text, or entries; `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) | Value::Markup(s) => Some(s.len()),
            Value::Seq(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            Value::Null => Some(0),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Follows a dotted path of mapping keys.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    /// Integer from a sum of integer operands, preferring the signed kind.
    pub(crate) fn from_i128(n: i128) -> Value {
        if let Ok(v) = i64::try_from(n) {
            Value::Int(v)
        } else if let Ok(v) = u64::try_from(n) {
            Value::Uint(v)
        } else {
            Value::Float(n as f64)
        }
    }

    pub(crate) fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int(n) => Some(*n as i128),
            Value::Uint(n) => Some(*n as i128),
            _ => None,
        }
    }

    /// Orders two values: numbers numerically (mixed kinds as floats), text
    /// lexicographically, dates chronologically.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Uint(a), Value::Uint(b)) => Some(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => {
                match (a.as_i128(), b.as_i128()) {
                    (Some(x), Some(y)) => Some(x.cmp(&y)),
                    _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
                }
            }
            (a, b) if a.as_str().is_some() && b.as_str().is_some() => {
                Some(a.as_str()?.cmp(b.as_str()?))
            }
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Equality with numeric widening.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => a.compare(b) == Some(Ordering::Equal),
            (a, b) if a.as_str().is_some() && b.as_str().is_some() => a.as_str() == b.as_str(),
            (a, b) => a == b,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Seq(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Uint(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Seq(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(d: DateTime<FixedOffset>) -> Self {
        Value::Date(d)
    }
}

/// Prints values the way `%v` would: `[a b]` for sequences, `map[k:v]` for mappings.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Uint(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) | Value::Markup(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S %z")),
            Value::Seq(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("map[")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Normalises the caller's data into the root mapping of a render.
///
/// Fails with `DATA_CONVERSION` unless the top level is a mapping or record.
pub fn normalize<T: Serialize + ?Sized>(data: &T) -> Result<Value> {
    let value = Value::from_serialize(data)?;
    match value {
        Value::Map(_) => Ok(value),
        other => Err(Error::new(
            ErrorCode::DataConversion,
            format!("top-level data must be a mapping or record, got {}", other.kind()),
        )),
    }
}
