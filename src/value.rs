//! §3.3-3.5: the scalar value domain and inline-literal constants.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// The closed set of scalar types a `Value` (or a typed null) may carry.
#[derive(Copy, Clone, Debug, Display, EnumString, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Decimal,
    Integer,
    Boolean,
    String,
    Timestamp,
}

/// §3.3 Value Types. Untyped nulls are unrepresentable: `Null` always
/// carries a `ValueType`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Decimal(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
    /// Nanoseconds since the UNIX epoch, UTC.
    Timestamp(i64),
    Null(ValueType),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Decimal(_) => ValueType::Decimal,
            Value::Integer(_) => ValueType::Integer,
            Value::Boolean(_) => ValueType::Boolean,
            Value::String(_) => ValueType::String,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Null(t) => *t,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// Integers always promote to decimal on demand; other numeric reads fail.
    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

/// §3.5 Constant: an inline literal used as a transform input in place of
/// another transform's output. `column_name` derives the stand-in column
/// identifier used when the constant is materialized into a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub value: Value,
}

impl Constant {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// The numeric form broadcast into `scalar_cache` when this constant is
    /// wired as a transform input. Booleans promote to `1.0`/`0.0`;
    /// timestamps to their raw nanosecond count. `String` and typed `Null`
    /// have no numeric form and are not broadcastable this way.
    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            Value::Decimal(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Timestamp(ns) => Some(*ns as f64),
            Value::String(_) | Value::Null(_) => None,
        }
    }

    /// Derives a unique, stable column name for this constant, e.g.
    /// `num_42`, `dec_3_14`, `text_hello`, `bool_true`, `null_Decimal`.
    pub fn column_name(&self) -> String {
        match &self.value {
            Value::Decimal(d) => {
                if *d == d.trunc() && d.is_finite() {
                    let as_int = *d as i64;
                    format!("num_{}", format_signed(as_int))
                } else {
                    let mut s = format!("{:.6}", d);
                    if let Some(dot) = s.find('.') {
                        let last_nonzero = s.trim_end_matches('0').len();
                        if last_nonzero > dot + 1 {
                            s.truncate(last_nonzero);
                        } else {
                            s.truncate(dot);
                            return format!("num_{}", s.replace('-', "n"));
                        }
                    }
                    format!("dec_{}", s.replace('.', "_").replace('-', "n"))
                }
            }
            Value::Integer(i) => format!("num_{}", format_signed(*i)),
            Value::Boolean(b) => format!("bool_{}", b),
            Value::String(s) => {
                if s.len() <= 30 {
                    let sanitized: String = s
                        .chars()
                        .map(|c| if c.is_alphanumeric() { c } else { '_' })
                        .collect();
                    format!("text_{}", sanitized)
                } else {
                    format!("text_hash_{:x}", simple_hash(s))
                }
            }
            Value::Timestamp(ns) => format!("time_{}", ns),
            Value::Null(t) => format!("null_{}", t),
        }
    }
}

fn format_signed(v: i64) -> String {
    if v < 0 {
        format!("n{}", -v)
    } else {
        v.to_string()
    }
}

fn simple_hash(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_column_name_is_clean() {
        let c = Constant::new(Value::Integer(42));
        assert_eq!(c.column_name(), "num_42");
    }

    #[test]
    fn negative_integer_uses_n_prefix() {
        let c = Constant::new(Value::Integer(-7));
        assert_eq!(c.column_name(), "num_n7");
    }

    #[test]
    fn fractional_decimal_gets_dec_prefix() {
        let c = Constant::new(Value::Decimal(3.14));
        assert_eq!(c.column_name(), "dec_3_14");
    }

    #[test]
    fn whole_decimal_gets_num_prefix() {
        let c = Constant::new(Value::Decimal(42.0));
        assert_eq!(c.column_name(), "num_42");
    }

    #[test]
    fn short_string_is_sanitized() {
        let c = Constant::new(Value::String("hello world!".into()));
        assert_eq!(c.column_name(), "text_hello_world_");
    }

    #[test]
    fn boolean_column_names() {
        assert_eq!(Constant::new(Value::Boolean(true)).column_name(), "bool_true");
        assert_eq!(Constant::new(Value::Boolean(false)).column_name(), "bool_false");
    }

    #[test]
    fn typed_null_column_name() {
        let c = Constant::new(Value::Null(ValueType::Decimal));
        assert_eq!(c.column_name(), "null_Decimal");
    }

    #[test]
    fn integer_promotes_to_decimal() {
        assert_eq!(Value::Integer(5).as_decimal(), Some(5.0));
        assert_eq!(Value::Boolean(true).as_decimal(), None);
    }
}
