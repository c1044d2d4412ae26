//! Query result models.
//!
//! Drivers produce a [`ResultSet`] of [`ScanValue`]s, their native scan
//! representation. The result type resolver turns that into a
//! [`QueryResult`] of [`TypedValue`]s selected by each column's runtime type
//! name.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

const NULL_DISPLAY: &str = "NULL";

/// Column metadata reported by the driver at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnType {
    /// Column name
    pub name: String,
    /// Database type name as reported by the driver (any case)
    pub type_name: String,
}

impl ColumnType {
    /// Create column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into() }
    }
}

/// One cell as scanned by a driver, before type resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum ScanValue {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Any integer width
    Int(i64),
    /// Any float width
    Float(f64),
    /// Text, also used for textual encodings such as numeric or interval
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Timestamp without time zone
    Timestamp(NaiveDateTime),
    /// Timestamp with time zone
    TimestampTz(DateTime<Utc>),
    /// Date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Time of day with a UTC offset in seconds east
    TimeTz(NaiveTime, i32),
    /// JSON document
    Json(serde_json::Value),
    /// One-dimensional array
    Array(Vec<ScanValue>),
}

impl ScanValue {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short kind name used in scan error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::TimestampTz(_) => "timestamptz",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::TimeTz(..) => "timetz",
            Self::Json(_) => "json",
            Self::Array(_) => "array",
        }
    }
}

impl fmt::Display for ScanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str(NULL_DISPLAY),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "\\x{}", hex::encode(b)),
            Self::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::TimestampTz(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f%:z")),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Self::TimeTz(t, offset) => {
                write!(f, "{}{}", t.format("%H:%M:%S%.f"), format_offset(*offset))
            }
            Self::Json(j) => write!(f, "{j}"),
            Self::Array(items) => write_list(f, items),
        }
    }
}

/// Raw output of one statement.
///
/// An empty column list means the statement produced no result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Columns in result-set order
    pub columns: Vec<ColumnType>,
    /// Rows aligned with `columns`
    pub rows: Vec<Vec<ScanValue>>,
}

impl ResultSet {
    /// Create a result set.
    pub fn new(columns: Vec<ColumnType>, rows: Vec<Vec<ScanValue>>) -> Self {
        Self { columns, rows }
    }

    /// A statement without a result set (DDL, DML without RETURNING).
    pub fn no_columns() -> Self {
        Self::default()
    }
}

/// Date/time values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Temporal {
    /// Timestamp without time zone
    Timestamp(NaiveDateTime),
    /// Timestamp with time zone, normalised to UTC
    TimestampTz(DateTime<Utc>),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Time of day with an offset in seconds east of UTC
    TimeTz(NaiveTime, i32),
}

impl fmt::Display for Temporal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::TimestampTz(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f%:z")),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Self::TimeTz(t, offset) => {
                write!(f, "{}{}", t.format("%H:%M:%S%.f"), format_offset(*offset))
            }
        }
    }
}

/// A decoded, null-aware result value.
///
/// Typed variants carry `None` when the scanned cell was NULL; they render
/// as `NULL`, never as a zero value. [`TypedValue::Null`] marks a cell the
/// driver did not supply at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum TypedValue {
    /// Text family
    Text(Option<String>),
    /// Boolean
    Bool(Option<bool>),
    /// 64-bit integer family
    Int64(Option<i64>),
    /// 32-bit integer family
    Int32(Option<i32>),
    /// 16-bit integer family
    Int16(Option<i16>),
    /// 64-bit float, including arbitrary-precision numeric
    Float64(Option<f64>),
    /// 32-bit float
    Float32(Option<f32>),
    /// Timestamp/date/time family
    Temporal(Option<Temporal>),
    /// UUID
    Uuid(Option<Uuid>),
    /// Untyped array captured as an element list
    Array(Option<Vec<TypedValue>>),
    /// Unrecognised type, kept in the driver's native representation
    Other(ScanValue),
    /// Absent scan target
    Null,
}

impl TypedValue {
    /// Check whether this value renders as NULL.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Text(v) => v.is_none(),
            Self::Bool(v) => v.is_none(),
            Self::Int64(v) => v.is_none(),
            Self::Int32(v) => v.is_none(),
            Self::Int16(v) => v.is_none(),
            Self::Float64(v) => v.is_none(),
            Self::Float32(v) => v.is_none(),
            Self::Temporal(v) => v.is_none(),
            Self::Uuid(v) => v.is_none(),
            Self::Array(v) => v.is_none(),
            Self::Other(v) => v.is_null(),
            Self::Null => true,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(v) => display_opt(f, v.as_ref()),
            Self::Bool(v) => display_opt(f, v.as_ref()),
            Self::Int64(v) => display_opt(f, v.as_ref()),
            Self::Int32(v) => display_opt(f, v.as_ref()),
            Self::Int16(v) => display_opt(f, v.as_ref()),
            Self::Float64(v) => display_opt(f, v.as_ref()),
            Self::Float32(v) => display_opt(f, v.as_ref()),
            Self::Temporal(v) => display_opt(f, v.as_ref()),
            // Uuid's Display is lower-case hyphenated.
            Self::Uuid(v) => display_opt(f, v.as_ref()),
            Self::Array(Some(items)) => write_list(f, items),
            Self::Array(None) => f.write_str(NULL_DISPLAY),
            Self::Other(v) => write!(f, "{v}"),
            Self::Null => f.write_str(NULL_DISPLAY),
        }
    }
}

fn display_opt<T: fmt::Display>(f: &mut fmt::Formatter<'_>, value: Option<&T>) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{v}"),
        None => f.write_str(NULL_DISPLAY),
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

fn format_offset(seconds_east: i32) -> String {
    let sign = if seconds_east < 0 { '-' } else { '+' };
    let abs = seconds_east.unsigned_abs();
    format!("{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60)
}

/// Fully materialised results of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column names in result-set order
    pub columns: Vec<String>,
    /// Rows aligned positionally with `columns`
    pub rows: Vec<Vec<TypedValue>>,
}

impl QueryResult {
    /// Get the number of rows returned.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_distinct_from_zero() {
        assert_eq!(TypedValue::Int32(None).to_string(), "NULL");
        assert_eq!(TypedValue::Int32(Some(0)).to_string(), "0");
        assert_eq!(TypedValue::Null.to_string(), "NULL");
        assert_ne!(TypedValue::Null, TypedValue::Int32(None));
    }

    #[test]
    fn test_bytes_render_as_hex() {
        let v = ScanValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(v.to_string(), "\\xdeadbeef");
    }

    #[test]
    fn test_time_tz_offset() {
        let t = NaiveTime::from_hms_opt(10, 30, 0).unwrap();
        assert_eq!(Temporal::TimeTz(t, -5 * 3600).to_string(), "10:30:00-05:00");
        assert_eq!(Temporal::TimeTz(t, 5 * 3600 + 1800).to_string(), "10:30:00+05:30");
    }

    #[test]
    fn test_array_display() {
        let v = TypedValue::Array(Some(vec![
            TypedValue::Other(ScanValue::Int(1)),
            TypedValue::Other(ScanValue::Null),
        ]));
        assert_eq!(v.to_string(), "[1, NULL]");
        assert!(TypedValue::Array(None).is_null());
    }
}
