//! Row Values
//!
//! Backend-neutral representation of the rows moved from the master to a
//! replica, plus the identifier quoting shared by every SQL builder.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// SQL value representation
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Check if value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual form used when comparing against configured values.
    ///
    /// NULL has no textual form and therefore never matches anything.
    pub fn match_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::UInt(u) => Some(u.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Bytes(b) => Some(match std::str::from_utf8(b) {
                Ok(s) => s.to_string(),
                Err(_) => hex::encode(b),
            }),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => Some(format_fraction(t.format("%H:%M:%S%.6f").to_string())),
            Value::DateTime(dt) => {
                Some(format_fraction(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()))
            }
            Value::Timestamp(ts) => {
                Some(format_fraction(ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()))
            }
        }
    }
}

/// A row read from a table: column names in table order with their values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value of a column, if the row has it
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Iterate over (column, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Quote an identifier with backticks, doubling embedded backticks.
///
/// Every table and column name goes through here so reserved words
/// (`order`, `key`, `group`) are safe as column names.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a string literal for MySQL (quotes doubled, backslashes escaped)
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

// Drop an all-zero fractional part so "12:00:00.000000" reads as "12:00:00"
fn format_fraction(s: String) -> String {
    match s.strip_suffix(".000000") {
        Some(trimmed) => trimmed.to_string(),
        None => s,
    }
}

// Hex encoding for bytes (simple implementation)
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
