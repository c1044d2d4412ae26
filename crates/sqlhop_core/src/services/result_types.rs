//! Runtime result typing.
//!
//! The resolver picks a decoder per column from the column's runtime type
//! name, then converts every scanned cell into a null-aware [`TypedValue`].

use crate::error::{HopError, HopResult};
use crate::models::{QueryResult, ResultSet, ScanValue, Temporal, TypedValue};

use std::collections::HashMap;
use uuid::Uuid;

/// Decoder selected for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    Text,
    Bool,
    Int64,
    Int32,
    Int16,
    Float64,
    Float32,
    Temporal,
    Uuid,
    Array,
    /// Keep the driver's native value
    Fallback,
}

/// Type name (upper case) to decoder. Anything not listed uses
/// [`Decoder::Fallback`].
const TYPE_TABLE: &[(&str, Decoder)] = &[
    ("CHARACTER", Decoder::Text),
    ("CHAR", Decoder::Text),
    ("BPCHAR", Decoder::Text),
    ("CHARACTER VARYING", Decoder::Text),
    ("VARCHAR", Decoder::Text),
    ("NVARCHAR", Decoder::Text),
    ("TEXT", Decoder::Text),
    ("NAME", Decoder::Text),
    ("CITEXT", Decoder::Text),
    ("BOOL", Decoder::Bool),
    ("BOOLEAN", Decoder::Bool),
    ("BIGINT", Decoder::Int64),
    ("INT8", Decoder::Int64),
    ("BIGSERIAL", Decoder::Int64),
    ("SERIAL8", Decoder::Int64),
    ("INTEGER", Decoder::Int32),
    ("INT", Decoder::Int32),
    ("INT4", Decoder::Int32),
    ("SERIAL", Decoder::Int32),
    ("SERIAL4", Decoder::Int32),
    ("SMALLINT", Decoder::Int16),
    ("INT2", Decoder::Int16),
    ("SMALLSERIAL", Decoder::Int16),
    ("SERIAL2", Decoder::Int16),
    ("DOUBLE", Decoder::Float64),
    ("DOUBLE PRECISION", Decoder::Float64),
    ("FLOAT8", Decoder::Float64),
    ("NUMERIC", Decoder::Float64),
    ("DECIMAL", Decoder::Float64),
    ("REAL", Decoder::Float32),
    ("FLOAT4", Decoder::Float32),
    ("TIMESTAMP", Decoder::Temporal),
    ("TIMESTAMPTZ", Decoder::Temporal),
    ("TIME", Decoder::Temporal),
    ("TIMETZ", Decoder::Temporal),
    ("DATE", Decoder::Temporal),
    ("UUID", Decoder::Uuid),
    ("ARRAY", Decoder::Array),
];

/// Resolves runtime-typed result sets into [`QueryResult`]s.
#[derive(Debug, Clone)]
pub struct ResultTypeResolver {
    table: HashMap<&'static str, Decoder>,
}

impl Default for ResultTypeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultTypeResolver {
    /// Create a resolver with the built-in type table.
    pub fn new() -> Self {
        Self { table: TYPE_TABLE.iter().copied().collect() }
    }

    /// Decoder for a runtime type name, matched case-insensitively.
    pub fn decoder_for(&self, type_name: &str) -> Decoder {
        self.table
            .get(type_name.trim().to_uppercase().as_str())
            .copied()
            .unwrap_or(Decoder::Fallback)
    }

    /// Decode a whole result set.
    ///
    /// Rows shorter than the column list get [`TypedValue::Null`] for the
    /// missing cells.
    pub fn resolve(&self, set: ResultSet) -> HopResult<QueryResult> {
        let decoders: Vec<Decoder> =
            set.columns.iter().map(|c| self.decoder_for(&c.type_name)).collect();

        let rows = set
            .rows
            .into_iter()
            .map(|row| {
                let mut cells = row.into_iter();
                set.columns
                    .iter()
                    .zip(&decoders)
                    .map(|(column, decoder)| match cells.next() {
                        Some(value) => decode(*decoder, &column.name, value),
                        None => Ok(TypedValue::Null),
                    })
                    .collect::<HopResult<Vec<_>>>()
            })
            .collect::<HopResult<Vec<_>>>()?;

        Ok(QueryResult { columns: set.columns.into_iter().map(|c| c.name).collect(), rows })
    }
}

/// Convert one scanned cell with the given decoder.
pub fn decode(decoder: Decoder, column: &str, value: ScanValue) -> HopResult<TypedValue> {
    let mismatch = |value: &ScanValue, target: &str| {
        HopError::scan(column, format!("cannot decode {} as {target}", value.kind()))
    };
    let overflow = |value: i64, target: &str| {
        HopError::scan(column, format!("value {value} overflows {target}"))
    };

    let typed = match decoder {
        Decoder::Fallback => TypedValue::Other(value),
        Decoder::Text => TypedValue::Text(match value {
            ScanValue::Null => None,
            ScanValue::Text(s) => Some(s),
            ScanValue::Bytes(b) => Some(
                String::from_utf8(b).map_err(|_| HopError::scan(column, "invalid utf-8 text"))?,
            ),
            other => Some(other.to_string()),
        }),
        Decoder::Bool => TypedValue::Bool(match value {
            ScanValue::Null => None,
            ScanValue::Bool(b) => Some(b),
            ScanValue::Int(i) => Some(i != 0),
            ScanValue::Text(ref s) => match s.to_lowercase().as_str() {
                "t" | "true" | "1" => Some(true),
                "f" | "false" | "0" => Some(false),
                _ => return Err(mismatch(&value, "bool")),
            },
            other => return Err(mismatch(&other, "bool")),
        }),
        Decoder::Int64 => TypedValue::Int64(match value {
            ScanValue::Null => None,
            other => Some(as_i64(column, other)?),
        }),
        Decoder::Int32 => TypedValue::Int32(match value {
            ScanValue::Null => None,
            other => {
                let i = as_i64(column, other)?;
                Some(i32::try_from(i).map_err(|_| overflow(i, "int32"))?)
            }
        }),
        Decoder::Int16 => TypedValue::Int16(match value {
            ScanValue::Null => None,
            other => {
                let i = as_i64(column, other)?;
                Some(i16::try_from(i).map_err(|_| overflow(i, "int16"))?)
            }
        }),
        Decoder::Float64 => TypedValue::Float64(match value {
            ScanValue::Null => None,
            other => Some(as_f64(column, other)?),
        }),
        Decoder::Float32 => TypedValue::Float32(match value {
            ScanValue::Null => None,
            other => {
                let f = as_f64(column, other)?;
                if f.is_finite() && f.abs() > f64::from(f32::MAX) {
                    return Err(HopError::scan(column, format!("value {f} overflows float32")));
                }
                Some(f as f32)
            }
        }),
        Decoder::Temporal => TypedValue::Temporal(match value {
            ScanValue::Null => None,
            ScanValue::Timestamp(ts) => Some(Temporal::Timestamp(ts)),
            ScanValue::TimestampTz(ts) => Some(Temporal::TimestampTz(ts)),
            ScanValue::Date(d) => Some(Temporal::Date(d)),
            ScanValue::Time(t) => Some(Temporal::Time(t)),
            ScanValue::TimeTz(t, offset) => Some(Temporal::TimeTz(t, offset)),
            other => return Err(mismatch(&other, "temporal")),
        }),
        Decoder::Uuid => TypedValue::Uuid(match value {
            ScanValue::Null => None,
            other => Some(parse_uuid(column, other)?),
        }),
        Decoder::Array => TypedValue::Array(match value {
            ScanValue::Null => None,
            ScanValue::Array(items) => Some(items.into_iter().map(TypedValue::Other).collect()),
            other => return Err(mismatch(&other, "array")),
        }),
    };

    Ok(typed)
}

fn as_i64(column: &str, value: ScanValue) -> HopResult<i64> {
    match value {
        ScanValue::Int(i) => Ok(i),
        ScanValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| HopError::scan(column, format!("invalid integer '{s}'"))),
        other => Err(HopError::scan(column, format!("cannot decode {} as integer", other.kind()))),
    }
}

fn as_f64(column: &str, value: ScanValue) -> HopResult<f64> {
    match value {
        ScanValue::Float(f) => Ok(f),
        ScanValue::Int(i) => Ok(i as f64),
        ScanValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| HopError::scan(column, format!("invalid number '{s}'"))),
        other => Err(HopError::scan(column, format!("cannot decode {} as float", other.kind()))),
    }
}

/// Accepts 16 raw bytes, 32 hex characters or the 36-character hyphenated
/// form, as bytes or text.
fn parse_uuid(column: &str, value: ScanValue) -> HopResult<Uuid> {
    let invalid = |len: usize| HopError::scan(column, format!("invalid uuid of length {len}"));

    match value {
        ScanValue::Bytes(bytes) if bytes.len() == 16 => {
            Uuid::from_slice(&bytes).map_err(|_| invalid(bytes.len()))
        }
        ScanValue::Bytes(bytes) => {
            let text = std::str::from_utf8(&bytes).map_err(|_| invalid(bytes.len()))?;
            parse_uuid_text(text).ok_or_else(|| invalid(bytes.len()))
        }
        ScanValue::Text(text) => parse_uuid_text(&text).ok_or_else(|| invalid(text.len())),
        other => Err(HopError::scan(column, format!("cannot decode {} as uuid", other.kind()))),
    }
}

fn parse_uuid_text(text: &str) -> Option<Uuid> {
    match text.len() {
        32 | 36 => Uuid::try_parse(text).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnType;

    const CANONICAL: &str = "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11";

    #[test]
    fn test_lookup_is_case_insensitive() {
        let resolver = ResultTypeResolver::new();
        assert_eq!(resolver.decoder_for("varchar"), Decoder::Text);
        assert_eq!(resolver.decoder_for("Double Precision"), Decoder::Float64);
        assert_eq!(resolver.decoder_for("INT4"), Decoder::Int32);
        assert_eq!(resolver.decoder_for("INTERVAL"), Decoder::Fallback);
        assert_eq!(resolver.decoder_for("JSONB"), Decoder::Fallback);
    }

    #[test]
    fn test_uuid_encodings_agree() {
        let raw = Uuid::parse_str(CANONICAL).unwrap().as_bytes().to_vec();
        let inputs = [
            ScanValue::Bytes(raw),
            ScanValue::Text(CANONICAL.replace('-', "")),
            ScanValue::Text(CANONICAL.to_uppercase()),
            ScanValue::Bytes(CANONICAL.as_bytes().to_vec()),
        ];
        for input in inputs {
            let value = decode(Decoder::Uuid, "id", input).unwrap();
            assert_eq!(value.to_string(), CANONICAL);
        }
    }

    #[test]
    fn test_uuid_rejects_other_lengths() {
        let err = decode(Decoder::Uuid, "id", ScanValue::Bytes(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(err, HopError::Scan { .. }));
        let braced = format!("{{{CANONICAL}}}");
        assert!(decode(Decoder::Uuid, "id", ScanValue::Text(braced)).is_err());
    }

    #[test]
    fn test_null_int_is_not_zero() {
        let value = decode(Decoder::Int32, "n", ScanValue::Null).unwrap();
        assert_eq!(value, TypedValue::Int32(None));
        assert_eq!(value.to_string(), "NULL");
    }

    #[test]
    fn test_overflow_is_scan_error() {
        let err = decode(Decoder::Int16, "n", ScanValue::Int(40_000)).unwrap_err();
        assert!(matches!(err, HopError::Scan { .. }));
        assert!(decode(Decoder::Int32, "n", ScanValue::Int(i64::MAX)).is_err());
        assert_eq!(decode(Decoder::Int16, "n", ScanValue::Int(-5)).unwrap(), TypedValue::Int16(Some(-5)));
    }

    #[test]
    fn test_numeric_text_decodes_as_float() {
        let value = decode(Decoder::Float64, "price", ScanValue::Text("12.50".into())).unwrap();
        assert_eq!(value, TypedValue::Float64(Some(12.5)));
    }

    #[test]
    fn test_numeric_beyond_decimal_range() {
        let text = |s: String| ScanValue::Text(s);
        let big = decode(Decoder::Float64, "n", text(format!("1{}", "0".repeat(40)))).unwrap();
        assert_eq!(big, TypedValue::Float64(Some(1e40)));

        let tiny = decode(Decoder::Float64, "n", text(format!("0.{}1", "0".repeat(30)))).unwrap();
        assert_eq!(tiny, TypedValue::Float64(Some(1e-31)));

        match decode(Decoder::Float64, "n", text("NaN".into())).unwrap() {
            TypedValue::Float64(Some(f)) => assert!(f.is_nan()),
            other => panic!("unexpected {other:?}"),
        }
        let ninf = decode(Decoder::Float64, "n", text("-Infinity".into())).unwrap();
        assert_eq!(ninf, TypedValue::Float64(Some(f64::NEG_INFINITY)));
    }

    #[test]
    fn test_fallback_keeps_native_value() {
        let native = ScanValue::Text("1 day".into());
        let value = decode(Decoder::Fallback, "i", native.clone()).unwrap();
        assert_eq!(value, TypedValue::Other(native));
    }

    #[test]
    fn test_short_rows_get_null_marker() {
        let set = ResultSet::new(
            vec![ColumnType::new("a", "int4"), ColumnType::new("b", "text")],
            vec![vec![ScanValue::Int(1)]],
        );
        let result = ResultTypeResolver::new().resolve(set).unwrap();
        assert_eq!(result.columns, vec!["a", "b"]);
        assert_eq!(result.rows[0], vec![TypedValue::Int32(Some(1)), TypedValue::Null]);
    }
}
