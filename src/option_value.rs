//! §3.4: the declared-option domain and its user-facing string grammar.

use crate::value::{Value, ValueType};
use serde::{Deserialize, Serialize};

/// A time-of-day literal with an explicit timezone, used by session-window
/// options (e.g. `session_open = "09:30:00 America/New_York"`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeValue {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub micros: u32,
    pub tz: String,
}

/// A structured payload carried by `event_marker`-category transform options.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct EventMarkerSchema {
    pub title: String,
    pub icon: String,
    pub select_key: String,
}

/// A structured payload carried by `reporter`-category table options.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct TableReportSchema {
    pub title: String,
    pub columns: Vec<String>,
}

/// A structured SQL-like filter payload used by a handful of control-flow
/// / filter transforms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement(pub String);

/// §3.4 OptionValue: the broader tagged sum used to carry user-supplied
/// transform options. A strict superset of `Value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OptionValue {
    Decimal(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
    Timestamp(i64),
    Null(ValueType),
    Sequence(Vec<Value>),
    Time(TimeValue),
    /// Symbolic reference to another option's value, resolved in a second pass.
    Ref(String),
    EventMarkerSchema(EventMarkerSchema),
    TableReportSchema(TableReportSchema),
    SqlStatement(SqlStatement),
}

impl From<Value> for OptionValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Decimal(d) => OptionValue::Decimal(d),
            Value::Integer(i) => OptionValue::Integer(i),
            Value::Boolean(b) => OptionValue::Boolean(b),
            Value::String(s) => OptionValue::String(s),
            Value::Timestamp(t) => OptionValue::Timestamp(t),
            Value::Null(t) => OptionValue::Null(t),
        }
    }
}

impl OptionValue {
    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            OptionValue::Decimal(d) => Some(*d),
            OptionValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            OptionValue::Integer(i) => Some(*i),
            OptionValue::Decimal(d) if *d == d.trunc() => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, OptionValue::Ref(_))
    }
}

/// Parses a user-supplied option string per the grammar prescribed in §3.4:
///
/// 1. Trim whitespace.
/// 2. `$ref:<name>` → `Ref`.
/// 3. `[a, b, c]` → `Sequence`, tokens all-numeric or all-non-numeric
///    (mixing is a parse error).
/// 4. `true`/`false` (case-insensitive) → `Boolean`.
/// 5. `nan`, `inf`, `-inf` (case-insensitive) → `Decimal`.
/// 6. Otherwise try a finite-double parse → `Decimal`.
/// 7. Otherwise keep as `String`.
pub fn parse_option_string(raw: &str) -> Result<OptionValue, String> {
    let trimmed = raw.trim();

    if let Some(name) = trimmed.strip_prefix("$ref:") {
        return Ok(OptionValue::Ref(name.trim().to_string()));
    }

    if let Some(inner) = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
    {
        return parse_sequence(inner);
    }

    if trimmed.eq_ignore_ascii_case("true") {
        return Ok(OptionValue::Boolean(true));
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Ok(OptionValue::Boolean(false));
    }

    if trimmed.eq_ignore_ascii_case("nan") {
        return Ok(OptionValue::Decimal(f64::NAN));
    }
    if trimmed.eq_ignore_ascii_case("inf") {
        return Ok(OptionValue::Decimal(f64::INFINITY));
    }
    if trimmed.eq_ignore_ascii_case("-inf") {
        return Ok(OptionValue::Decimal(f64::NEG_INFINITY));
    }

    if let Ok(d) = trimmed.parse::<f64>() {
        if d.is_finite() {
            return Ok(OptionValue::Decimal(d));
        }
    }

    Ok(OptionValue::String(trimmed.to_string()))
}

fn is_numeric_token(tok: &str) -> bool {
    let t = tok.trim();
    t.eq_ignore_ascii_case("nan")
        || t.eq_ignore_ascii_case("inf")
        || t.eq_ignore_ascii_case("-inf")
        || t.parse::<f64>().is_ok()
}

fn parse_sequence(inner: &str) -> Result<OptionValue, String> {
    if inner.trim().is_empty() {
        return Ok(OptionValue::Sequence(Vec::new()));
    }

    let tokens: Vec<&str> = inner.split(',').map(|s| s.trim()).collect();
    let all_numeric = tokens.iter().all(|t| is_numeric_token(t));
    let all_non_numeric = tokens.iter().all(|t| !is_numeric_token(t));

    if !all_numeric && !all_non_numeric {
        return Err(format!(
            "mixed numeric/non-numeric tokens in sequence literal: [{}]",
            inner
        ));
    }

    let values = tokens
        .into_iter()
        .map(token_to_value)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(OptionValue::Sequence(values))
}

fn token_to_value(tok: &str) -> Result<Value, String> {
    if tok.eq_ignore_ascii_case("true") {
        return Ok(Value::Boolean(true));
    }
    if tok.eq_ignore_ascii_case("false") {
        return Ok(Value::Boolean(false));
    }
    if tok.eq_ignore_ascii_case("nan") {
        return Ok(Value::Decimal(f64::NAN));
    }
    if tok.eq_ignore_ascii_case("inf") {
        return Ok(Value::Decimal(f64::INFINITY));
    }
    if tok.eq_ignore_ascii_case("-inf") {
        return Ok(Value::Decimal(f64::NEG_INFINITY));
    }
    if let Ok(d) = tok.parse::<f64>() {
        if d.is_finite() {
            return Ok(Value::Decimal(d));
        }
    }
    Ok(Value::String(tok.to_string()))
}
