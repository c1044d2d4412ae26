//! Postgres native scan representation.
//!
//! Every cell is read through [`PgCell`], which accepts any server type and
//! maps the binary wire value onto a [`ScanValue`]. Domains are read as
//! their base type; types without a dedicated mapping keep their raw bytes.

use crate::error::{HopError, HopResult};
use crate::models::ScanValue;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::error::Error;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::Row;

type BoxError = Box<dyn Error + Sync + Send>;

const MICROS_PER_SECOND: i64 = 1_000_000;

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Runtime type name reported to the result type resolver.
///
/// Arrays report `ARRAY`; domains report their base type.
pub fn type_name(ty: &Type) -> String {
    match ty.kind() {
        Kind::Array(_) => "ARRAY".to_string(),
        Kind::Domain(base) => type_name(base),
        _ => ty.name().to_uppercase(),
    }
}

/// Scan every cell of a row.
pub fn scan_row(row: &Row) -> HopResult<Vec<ScanValue>> {
    (0..row.len())
        .map(|idx| {
            row.try_get::<_, PgCell>(idx).map(|cell| cell.0).map_err(|e| {
                let column = row.columns().get(idx).map(|c| c.name()).unwrap_or("?");
                HopError::scan(column, e.to_string())
            })
        })
        .collect()
}

/// A single cell of any type.
#[derive(Debug)]
pub struct PgCell(pub ScanValue);

impl<'a> FromSql<'a> for PgCell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        decode(ty, raw).map(PgCell)
    }

    fn from_sql_null(_: &Type) -> Result<Self, BoxError> {
        Ok(PgCell(ScanValue::Null))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn decode(ty: &Type, raw: &[u8]) -> Result<ScanValue, BoxError> {
    match ty.kind() {
        Kind::Domain(base) => return decode(base, raw),
        Kind::Array(_) => {
            let items = Vec::<PgCell>::from_sql(ty, raw)?;
            return Ok(ScanValue::Array(items.into_iter().map(|cell| cell.0).collect()));
        }
        Kind::Enum(_) => return Ok(ScanValue::Text(std::str::from_utf8(raw)?.to_string())),
        _ => {}
    }

    let value = match *ty {
        Type::BOOL => ScanValue::Bool(bool::from_sql(ty, raw)?),
        Type::CHAR => ScanValue::Text(char::from(i8::from_sql(ty, raw)? as u8).to_string()),
        Type::INT2 => ScanValue::Int(i16::from_sql(ty, raw)?.into()),
        Type::INT4 => ScanValue::Int(i32::from_sql(ty, raw)?.into()),
        Type::INT8 => ScanValue::Int(i64::from_sql(ty, raw)?),
        Type::OID => ScanValue::Int(u32::from_sql(ty, raw)?.into()),
        Type::FLOAT4 => ScanValue::Float(f32::from_sql(ty, raw)?.into()),
        Type::FLOAT8 => ScanValue::Float(f64::from_sql(ty, raw)?),
        Type::NUMERIC => ScanValue::Text(decode_numeric(raw)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            ScanValue::Text(String::from_sql(ty, raw)?)
        }
        Type::TIMESTAMP => ScanValue::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
        Type::TIMESTAMPTZ => ScanValue::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
        Type::DATE => ScanValue::Date(NaiveDate::from_sql(ty, raw)?),
        Type::TIME => ScanValue::Time(NaiveTime::from_sql(ty, raw)?),
        Type::TIMETZ => {
            let (time, offset) = decode_timetz(raw)?;
            ScanValue::TimeTz(time, offset)
        }
        Type::INTERVAL => ScanValue::Text(decode_interval(raw)?),
        Type::JSON | Type::JSONB => ScanValue::Json(serde_json::Value::from_sql(ty, raw)?),
        // UUIDs stay raw; the resolver canonicalises all accepted encodings.
        _ => match ty.name() {
            "citext" => ScanValue::Text(std::str::from_utf8(raw)?.to_string()),
            _ => ScanValue::Bytes(raw.to_vec()),
        },
    };

    Ok(value)
}

/// Binary `numeric` as exact decimal text.
///
/// Layout: digit count, weight of the first digit, sign word, display scale,
/// then base-10000 digits. Values of any precision survive; `NaN` and the
/// infinities use the spellings Postgres prints.
fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    let word = |idx: usize| -> Result<u16, BoxError> {
        raw.get(idx * 2..idx * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| format!("invalid numeric length {}", raw.len()).into())
    };

    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);
    if raw.len() != 8 + ndigits * 2 {
        return Err(format!("invalid numeric length {}", raw.len()).into());
    }

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        0 | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign 0x{other:04x}").into()),
    }

    let digits = (0..ndigits).map(|i| word(4 + i)).collect::<Result<Vec<_>, _>>()?;
    // Digit at index `k` carries weight `weight - k`.
    let digit_at = |k: i32| -> u16 {
        usize::try_from(k).ok().and_then(|k| digits.get(k).copied()).unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit_at(0).to_string());
        for k in 1..=weight {
            text.push_str(&format!("{:04}", digit_at(k)));
        }
    }

    if dscale > 0 {
        let groups = dscale.div_ceil(4) as i32;
        let mut frac = String::with_capacity(groups as usize * 4);
        for j in 1..=groups {
            frac.push_str(&format!("{:04}", digit_at(weight + j)));
        }
        frac.truncate(dscale);
        text.push('.');
        text.push_str(&frac);
    }

    Ok(text)
}

/// Binary `timetz`: microseconds since midnight, then the zone in seconds
/// west of UTC. Returns the time and the offset in seconds east.
fn decode_timetz(raw: &[u8]) -> Result<(NaiveTime, i32), BoxError> {
    let (micros, zone) = match raw {
        [m @ .., z0, z1, z2, z3] if m.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(m);
            (i64::from_be_bytes(buf), i32::from_be_bytes([*z0, *z1, *z2, *z3]))
        }
        _ => return Err(format!("invalid timetz length {}", raw.len()).into()),
    };

    let secs = u32::try_from(micros / MICROS_PER_SECOND)?;
    let nanos = u32::try_from((micros % MICROS_PER_SECOND) * 1000)?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or("timetz out of range")?;
    Ok((time, -zone))
}

/// Binary `interval`: microseconds, days, months. Rendered the way psql
/// prints the default `postgres` interval style.
fn decode_interval(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() != 16 {
        return Err(format!("invalid interval length {}", raw.len()).into());
    }
    let micros = i64::from_be_bytes(raw[0..8].try_into()?);
    let days = i32::from_be_bytes(raw[8..12].try_into()?);
    let months = i32::from_be_bytes(raw[12..16].try_into()?);

    let mut parts = Vec::new();
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        parts.push(format!("{years} year{}", plural(years)));
    }
    if months != 0 {
        parts.push(format!("{months} mon{}", plural(months)));
    }
    if days != 0 {
        parts.push(format!("{days} day{}", plural(days)));
    }
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let abs = micros.unsigned_abs();
        let total_secs = abs / MICROS_PER_SECOND as u64;
        let frac = abs % MICROS_PER_SECOND as u64;
        let mut clock = format!(
            "{sign}{:02}:{:02}:{:02}",
            total_secs / 3600,
            (total_secs % 3600) / 60,
            total_secs % 60
        );
        if frac != 0 {
            let digits = format!("{frac:06}");
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }

    Ok(parts.join(" "))
}

fn plural(n: i32) -> &'static str {
    if n.abs() == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(&Type::INT4), "INT4");
        assert_eq!(type_name(&Type::TIMESTAMPTZ), "TIMESTAMPTZ");
        assert_eq!(type_name(&Type::INT4_ARRAY), "ARRAY");
        assert_eq!(type_name(&Type::UUID), "UUID");
    }

    #[test]
    fn test_scalar_decoding() {
        assert_eq!(decode(&Type::INT4, &42i32.to_be_bytes()).unwrap(), ScanValue::Int(42));
        assert_eq!(decode(&Type::INT2, &(-7i16).to_be_bytes()).unwrap(), ScanValue::Int(-7));
        assert_eq!(decode(&Type::BOOL, &[1]).unwrap(), ScanValue::Bool(true));
        assert_eq!(decode(&Type::TEXT, b"hello").unwrap(), ScanValue::Text("hello".into()));
        assert_eq!(decode(&Type::FLOAT8, &1.5f64.to_be_bytes()).unwrap(), ScanValue::Float(1.5));
    }

    #[test]
    fn test_uuid_stays_raw() {
        let raw = [0xabu8; 16];
        assert_eq!(decode(&Type::UUID, &raw).unwrap(), ScanValue::Bytes(raw.to_vec()));
    }

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_numeric_keeps_full_precision() {
        assert_eq!(decode_numeric(&numeric(0, 0, 1, &[12, 5000])).unwrap(), "12.5");
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_NEG, 2, &[3, 1400])).unwrap(), "-3.14");
        assert_eq!(decode_numeric(&numeric(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(decode_numeric(&numeric(1, 0, 3, &[1, 0])).unwrap(), "10000.000");

        let big = decode_numeric(&numeric(10, 0, 0, &[1])).unwrap();
        assert_eq!(big, format!("1{}", "0".repeat(40)));
        assert_eq!(big.parse::<f64>().unwrap(), 1e40);

        let tiny = decode_numeric(&numeric(-8, 0, 31, &[10])).unwrap();
        assert_eq!(tiny, format!("0.{}1", "0".repeat(30)));
        assert_eq!(tiny.parse::<f64>().unwrap(), 1e-31);
    }

    #[test]
    fn test_numeric_special_values() {
        assert_eq!(decode(&Type::NUMERIC, &numeric(0, NUMERIC_NAN, 0, &[])).unwrap(), ScanValue::Text("NaN".into()));
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_PINF, 0, &[])).unwrap(), "Infinity");
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_NINF, 0, &[])).unwrap(), "-Infinity");
        assert!(decode_numeric(&[0, 1]).is_err());
        assert!(decode_numeric(&numeric(0, 0, 0, &[1])[..9]).is_err());
    }

    #[test]
    fn test_timetz() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&((10 * 3600 + 30 * 60) as i64 * MICROS_PER_SECOND).to_be_bytes());
        raw.extend_from_slice(&(5 * 3600i32).to_be_bytes());
        let (time, offset) = decode_timetz(&raw).unwrap();
        assert_eq!(time, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
        assert_eq!(offset, -5 * 3600);
    }

    fn interval(micros: i64, days: i32, months: i32) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&micros.to_be_bytes());
        raw.extend_from_slice(&days.to_be_bytes());
        raw.extend_from_slice(&months.to_be_bytes());
        raw
    }

    #[test]
    fn test_interval() {
        assert_eq!(decode_interval(&interval(0, 0, 0)).unwrap(), "00:00:00");
        assert_eq!(
            decode_interval(&interval(3_723_500_000, 3, 14)).unwrap(),
            "1 year 2 mons 3 days 01:02:03.5"
        );
        assert_eq!(decode_interval(&interval(0, 1, 0)).unwrap(), "1 day");
        assert!(decode_interval(&[0u8; 4]).is_err());
    }
}
