//! Value helpers shared by the interpreter and the accumulators
//!
//! Programs and accumulators operate on plain JSON values. Numbers keep
//! integer precision as long as the arithmetic allows it and fall back to
//! doubles otherwise.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;

/// Declared value type of an accumulator
///
/// `null` is accepted by every type: it is the "absent" value most
/// accumulators clear to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    #[serde(alias = "slice")]
    Any,
    #[serde(alias = "integer")]
    Int,
    Double,
    Bool,
    String,
    List,
}

impl ValueType {
    /// Check whether `value` may be stored in an accumulator of this type
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            ValueType::Any => true,
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Double => value.is_number(),
            ValueType::Bool => value.is_boolean(),
            ValueType::String => value.is_string(),
            ValueType::List => value.is_array(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Any => "any",
            ValueType::Int => "int",
            ValueType::Double => "double",
            ValueType::Bool => "bool",
            ValueType::String => "string",
            ValueType::List => "list",
        };
        f.write_str(name)
    }
}

/// Name of a value's runtime type, for diagnostics
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "document",
    }
}

/// Only `null` and `false` are falsy
pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Numeric view of a JSON number
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn from_value(value: &Value) -> Option<Self> {
        let Value::Number(n) = value else {
            return None;
        };
        match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    /// Convert back to JSON; `None` for NaN and infinities
    pub fn into_value(self) -> Option<Value> {
        match self {
            Num::Int(i) => Some(Value::from(i)),
            Num::Float(f) => Number::from_f64(f).map(Value::Number),
        }
    }

    pub fn add(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_add(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 + b as f64)),
            _ => Num::Float(self.as_f64() + other.as_f64()),
        }
    }

    pub fn sub(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_sub(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 - b as f64)),
            _ => Num::Float(self.as_f64() - other.as_f64()),
        }
    }

    pub fn mul(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_mul(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 * b as f64)),
            _ => Num::Float(self.as_f64() * other.as_f64()),
        }
    }

    /// Division; integral when both sides are integers and the division is exact.
    /// Returns `None` on division by zero.
    pub fn div(self, other: Num) -> Option<Num> {
        if other.as_f64() == 0.0 {
            return None;
        }
        match (self, other) {
            (Num::Int(a), Num::Int(b)) if a.checked_rem(b) == Some(0) => a.checked_div(b).map(Num::Int),
            _ => Some(Num::Float(self.as_f64() / other.as_f64())),
        }
    }

    /// Remainder; `None` on division by zero
    pub fn rem(self, other: Num) -> Option<Num> {
        if other.as_f64() == 0.0 {
            return None;
        }
        match (self, other) {
            // `i64::MIN % -1` overflows in hardware but is 0
            (Num::Int(a), Num::Int(b)) => Some(Num::Int(a.wrapping_rem(b))),
            _ => Some(Num::Float(self.as_f64() % other.as_f64())),
        }
    }

    /// Total order over numbers; NaN never appears in JSON values
    pub fn cmp_num(self, other: Num) -> Ordering {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a.cmp(&b),
            _ => self
                .as_f64()
                .partial_cmp(&other.as_f64())
                .unwrap_or(Ordering::Equal),
        }
    }
}

/// Order two values of the same scalar kind
///
/// Numbers compare numerically (so `1` and `1.0` are equal), strings
/// lexicographically, booleans with `false < true`. Other pairs are
/// incomparable.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (Num::from_value(a)?, Num::from_value(b)?);
            Some(x.cmp_num(y))
        }
        _ => None,
    }
}

/// Structural equality with numeric normalization
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}
