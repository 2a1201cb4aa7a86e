//! Value coercion from SQLite storage classes to MySQL column types.
//!
//! SQLite stores whatever it is given, so a column declared `INTEGER` may hold
//! text and a `DATETIME` column may hold epoch seconds. Each value is checked
//! against its mapped column here; a value that cannot be represented is a
//! [`MigrateError::RowCoercion`] and the caller skips the row.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::core::{Row, SqlValue};
use crate::error::{MigrateError, Result};
use crate::typemap::{TargetColumnSpec, TargetType};

/// Julian day number of 1970-01-01T00:00:00Z.
const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Coerce every value of a row to its column. Fails on the first value that
/// does not fit.
pub fn coerce_row(columns: &[TargetColumnSpec], row: Row) -> Result<Row> {
    if row.len() != columns.len() {
        return Err(MigrateError::coercion(
            "*",
            format!("row has {} values, table has {} columns", row.len(), columns.len()),
        ));
    }
    columns
        .iter()
        .zip(row)
        .map(|(spec, value)| coerce_value(spec, value))
        .collect()
}

/// Coerce one value to its target column.
pub fn coerce_value(spec: &TargetColumnSpec, value: SqlValue) -> Result<SqlValue> {
    let fail = |message: String| MigrateError::coercion(&spec.name, message);

    // SQLite tools commonly write '' where they mean "no value".
    let value = match value {
        SqlValue::Text(s) if s.trim().is_empty() && !is_textual(spec.target_type) => {
            SqlValue::Null
        }
        other => other,
    };

    if value.is_null() {
        if spec.nullable || spec.auto_increment {
            return Ok(SqlValue::Null);
        }
        return Err(fail("NULL in NOT NULL column".into()));
    }

    match spec.target_type {
        TargetType::TinyInt => to_int(value, i8::MIN as i64, i8::MAX as i64, "TINYINT").map_err(fail),
        TargetType::SmallInt => {
            to_int(value, i16::MIN as i64, i16::MAX as i64, "SMALLINT").map_err(fail)
        }
        TargetType::MediumInt => to_int(value, -8_388_608, 8_388_607, "MEDIUMINT").map_err(fail),
        TargetType::Int => to_int(value, i32::MIN as i64, i32::MAX as i64, "INT").map_err(fail),
        TargetType::BigInt => to_int(value, i64::MIN, i64::MAX, "BIGINT").map_err(fail),
        TargetType::BigIntUnsigned => to_int(value, 0, i64::MAX, "BIGINT UNSIGNED").map_err(fail),
        TargetType::Boolean => to_bool(value).map_err(fail),
        TargetType::Double => to_double(value).map_err(fail),
        TargetType::Decimal { precision, scale } => {
            to_decimal(value, precision, scale).map_err(fail)
        }
        TargetType::Date => to_datetime(value)
            .map(|dt| SqlValue::Date(dt.date()))
            .map_err(fail),
        TargetType::DateTime => to_datetime(value).map(SqlValue::DateTime).map_err(fail),
        TargetType::Time => to_time(value).map(SqlValue::Time).map_err(fail),
        TargetType::Char(_)
        | TargetType::Varchar(_)
        | TargetType::Text
        | TargetType::MediumText
        | TargetType::LongText => to_text(value, spec.target_type.char_capacity()).map_err(fail),
        TargetType::Blob | TargetType::LongBlob => {
            to_bytes(value, spec.target_type.byte_capacity()).map_err(fail)
        }
    }
}

fn is_textual(t: TargetType) -> bool {
    matches!(
        t,
        TargetType::Char(_)
            | TargetType::Varchar(_)
            | TargetType::Text
            | TargetType::MediumText
            | TargetType::LongText
            | TargetType::Blob
            | TargetType::LongBlob
    )
}

fn to_int(value: SqlValue, min: i64, max: i64, type_name: &str) -> std::result::Result<SqlValue, String> {
    let n = match value {
        SqlValue::Int(i) => i,
        SqlValue::Float(f) => float_to_i64(f)?,
        SqlValue::Decimal(d) => d
            .round()
            .to_i64()
            .ok_or_else(|| format!("{} out of range for {}", d, type_name))?,
        SqlValue::Text(s) => {
            let t = s.trim();
            match t.parse::<i64>() {
                Ok(i) => i,
                Err(_) => match t.parse::<f64>() {
                    Ok(f) => float_to_i64(f)?,
                    Err(_) => return Err(format!("'{}' is not a number", truncate(t))),
                },
            }
        }
        other => return Err(format!("cannot store {} in {}", other.kind(), type_name)),
    };
    if n < min || n > max {
        return Err(format!("{} out of range for {}", n, type_name));
    }
    Ok(SqlValue::Int(n))
}

fn float_to_i64(f: f64) -> std::result::Result<i64, String> {
    if !f.is_finite() {
        return Err(format!("{} is not a finite number", f));
    }
    let r = f.round();
    if r < i64::MIN as f64 || r >= i64::MAX as f64 {
        return Err(format!("{} out of range for BIGINT", f));
    }
    Ok(r as i64)
}

fn to_bool(value: SqlValue) -> std::result::Result<SqlValue, String> {
    let b = match value {
        SqlValue::Int(i) => i != 0,
        SqlValue::Float(f) if f.is_finite() => f != 0.0,
        SqlValue::Decimal(d) => !d.is_zero(),
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "y" | "on" => true,
            "0" | "false" | "f" | "no" | "n" | "off" => false,
            other => return Err(format!("'{}' is not a boolean", truncate(other))),
        },
        other => return Err(format!("cannot store {} in TINYINT(1)", other.kind())),
    };
    Ok(SqlValue::Int(i64::from(b)))
}

fn to_double(value: SqlValue) -> std::result::Result<SqlValue, String> {
    let f = match value {
        SqlValue::Int(i) => i as f64,
        SqlValue::Float(f) => f,
        SqlValue::Decimal(d) => d.to_f64().ok_or_else(|| format!("{} out of range for DOUBLE", d))?,
        SqlValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", truncate(s.trim())))?,
        other => return Err(format!("cannot store {} in DOUBLE", other.kind())),
    };
    if !f.is_finite() {
        return Err(format!("{} cannot be stored in DOUBLE", f));
    }
    Ok(SqlValue::Float(f))
}

fn to_decimal(value: SqlValue, precision: u32, scale: u32) -> std::result::Result<SqlValue, String> {
    let d = match value {
        SqlValue::Int(i) => Decimal::from(i),
        SqlValue::Float(f) => {
            Decimal::from_f64(f).ok_or_else(|| format!("{} cannot be stored in DECIMAL", f))?
        }
        SqlValue::Decimal(d) => d,
        SqlValue::Text(s) => {
            let t = s.trim();
            Decimal::from_str(t)
                .or_else(|_| Decimal::from_scientific(t))
                .map_err(|_| format!("'{}' is not a decimal number", truncate(t)))?
        }
        other => return Err(format!("cannot store {} in DECIMAL", other.kind())),
    };

    let rounded = d.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    let integer_digits = integer_digit_count(&rounded);
    let allowed = precision.saturating_sub(scale);
    if integer_digits > allowed {
        return Err(format!(
            "{} exceeds DECIMAL({},{})",
            d, precision, scale
        ));
    }
    Ok(SqlValue::Decimal(rounded))
}

fn integer_digit_count(d: &Decimal) -> u32 {
    let whole = d.abs().trunc();
    if whole.is_zero() {
        0
    } else {
        whole.to_string().len() as u32
    }
}

fn to_datetime(value: SqlValue) -> std::result::Result<NaiveDateTime, String> {
    match value {
        SqlValue::DateTime(dt) => Ok(dt),
        SqlValue::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
        SqlValue::Int(secs) => from_unix_seconds(secs as f64),
        SqlValue::Float(jd) => from_julian_day(jd),
        SqlValue::Text(s) => parse_datetime_text(s.trim()),
        other => Err(format!("cannot store {} in a date/time column", other.kind())),
    }
}

fn parse_datetime_text(s: &str) -> std::result::Result<NaiveDateTime, String> {
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d.and_time(NaiveTime::MIN));
    }
    // Numeric text: epoch seconds or a Julian day, as SQLite's date functions accept.
    if let Ok(i) = s.parse::<i64>() {
        return from_unix_seconds(i as f64);
    }
    if let Ok(f) = s.parse::<f64>() {
        return from_julian_day(f);
    }
    Err(format!("'{}' is not a date/time", truncate(s)))
}

fn from_unix_seconds(secs: f64) -> std::result::Result<NaiveDateTime, String> {
    if !secs.is_finite() {
        return Err(format!("{} is not a timestamp", secs));
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    if whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
        return Err(format!("{} is out of range for a timestamp", secs));
    }
    DateTime::from_timestamp(whole as i64, nanos)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| format!("{} is out of range for a timestamp", secs))
}

fn from_julian_day(jd: f64) -> std::result::Result<NaiveDateTime, String> {
    from_unix_seconds((jd - UNIX_EPOCH_JULIAN_DAY) * 86_400.0)
}

fn to_time(value: SqlValue) -> std::result::Result<NaiveTime, String> {
    match value {
        SqlValue::Time(t) => Ok(t),
        SqlValue::Text(s) => {
            let t = s.trim();
            NaiveTime::parse_from_str(t, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
                .or_else(|_| parse_datetime_text(t).map(|dt| dt.time()))
                .map_err(|_| format!("'{}' is not a time", truncate(t)))
        }
        other => to_datetime(other).map(|dt| dt.time()),
    }
}

fn to_text(value: SqlValue, capacity: Option<u64>) -> std::result::Result<SqlValue, String> {
    let s = match value {
        SqlValue::Text(s) => s,
        SqlValue::Bytes(b) => {
            String::from_utf8(b).map_err(|_| "binary data is not valid UTF-8 text".to_string())?
        }
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        SqlValue::Null => return Ok(SqlValue::Null),
    };
    if let Some(cap) = capacity {
        let len = s.chars().count() as u64;
        if len > cap {
            return Err(format!("text of {} characters exceeds limit of {}", len, cap));
        }
    }
    Ok(SqlValue::Text(s))
}

fn to_bytes(value: SqlValue, capacity: Option<u64>) -> std::result::Result<SqlValue, String> {
    let b = match value {
        SqlValue::Bytes(b) => b,
        SqlValue::Text(s) => s.into_bytes(),
        SqlValue::Int(i) => i.to_string().into_bytes(),
        SqlValue::Float(f) => f.to_string().into_bytes(),
        other => return Err(format!("cannot store {} in a BLOB column", other.kind())),
    };
    if let Some(cap) = capacity {
        if b.len() as u64 > cap {
            return Err(format!("{} bytes exceeds limit of {}", b.len(), cap));
        }
    }
    Ok(SqlValue::Bytes(b))
}

/// Keep error messages short when the offending value is large.
fn truncate(s: &str) -> String {
    const MAX: usize = 40;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let head: String = s.chars().take(MAX).collect();
        format!("{}...", head)
    }
}
