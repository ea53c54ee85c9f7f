//! Values flowing through a field pipeline

use chrono::{DateTime, FixedOffset};
use scraper::ElementRef;
use serde::Serialize;
use std::fmt;

use crate::query::Extract;

/// Intermediate value handed from one filter to the next.
///
/// `Node` is the matched element itself; it is read through the field's
/// extraction mode the first time a filter needs a string.
#[derive(Debug, Clone)]
pub enum Value<'a> {
    Node(ElementRef<'a>),
    Text(String),
    List(Vec<String>),
    Number(f64),
    Size(u64),
    Time(DateTime<FixedOffset>),
}

impl<'a> Value<'a> {
    /// Short name used in filter error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Node(_) => "node",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Number(_) => "number",
            Value::Size(_) => "size",
            Value::Time(_) => "time",
        }
    }

    /// Coerce to a single string.
    pub fn into_text(self, extract: &Extract) -> Result<String, String> {
        match self {
            Value::Node(el) => extract
                .apply(el)
                .ok_or_else(|| format!("matched element has no {}", String::from(extract.clone()))),
            Value::Text(s) => Ok(s),
            Value::List(items) => Err(format!(
                "expected a single value, got a list of {}",
                items.len()
            )),
            other => Ok(FieldValue::from_scalar(other)
                .map(|v| v.to_string())
                .unwrap_or_default()),
        }
    }

    /// Convert into the owned output form.
    pub fn finish(self, extract: &Extract) -> Result<FieldValue, String> {
        match self {
            Value::Node(_) => self.into_text(extract).map(FieldValue::Text),
            Value::List(items) => Ok(FieldValue::List(items)),
            other => FieldValue::from_scalar(other).ok_or_else(|| "unconvertible value".to_string()),
        }
    }
}

/// A resolved, typed field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Number(f64),
    /// Byte count.
    Size(u64),
    Time(DateTime<FixedOffset>),
}

impl FieldValue {
    fn from_scalar(value: Value<'_>) -> Option<Self> {
        match value {
            Value::Text(s) => Some(FieldValue::Text(s)),
            Value::Number(n) => Some(FieldValue::Number(n)),
            Value::Size(n) => Some(FieldValue::Size(n)),
            Value::Time(t) => Some(FieldValue::Time(t)),
            Value::List(items) => Some(FieldValue::List(items)),
            Value::Node(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view: numbers, byte sizes and numeric text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Size(n) => Some(*n as f64),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Byte view: sizes and non-negative finite numbers.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Size(n) => Some(*n),
            FieldValue::Number(n) if n.is_finite() && *n >= 0.0 => Some(n.round() as u64),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whole-number view for counters. Byte sizes are not counts.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            FieldValue::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => Some(*n as u64),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            FieldValue::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::List(items) => f.write_str(&items.join(",")),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Size(n) => write!(f, "{n}"),
            FieldValue::Time(t) => f.write_str(&t.to_rfc3339()),
        }
    }
}
