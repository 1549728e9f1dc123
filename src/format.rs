//! Graphite plaintext line formatting
//!
//! One data point becomes one line:
//!
//! ```text
//! <prefix>.<name>.<field> <value> <unix-seconds>\n
//! ```
use std::fmt::{self, Write};

/// A numeric value as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            // Shortest representation that round-trips, never exponent form
            FieldValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

/// One exportable (suffix, value) pair of a metric
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Field key for a percentile fraction: `0.95` -> `"95"`, `0.999` -> `"999"`
pub fn percentile_key(fraction: f64) -> String {
    (fraction * 100.0).to_string().replacen('.', "", 1)
}

/// Append one wire line to `out`
pub fn write_line(
    out: &mut String,
    prefix: &str,
    name: &str,
    field: &str,
    value: FieldValue,
    timestamp: i64,
) {
    // Writing into a String cannot fail
    let _ = if prefix.is_empty() {
        writeln!(out, "{}.{} {} {}", name, field, value, timestamp)
    } else {
        writeln!(out, "{}.{}.{} {} {}", prefix, name, field, value, timestamp)
    };
}

/// Append one line per field of a single metric
pub fn write_fields(out: &mut String, prefix: &str, name: &str, fields: &[Field], timestamp: i64) {
    for field in fields {
        write_line(out, prefix, name, &field.name, field.value, timestamp);
    }
}
