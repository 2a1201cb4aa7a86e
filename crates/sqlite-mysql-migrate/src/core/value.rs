//! SQL value types moved between the source reader, coercion and writers.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::ValueRef;
use rust_decimal::Decimal;

/// A single cell value.
///
/// Source rows arrive using only the five SQLite storage classes
/// (`Null`, `Int`, `Float`, `Text`, `Bytes`); coercion may turn them into the
/// richer variants before they reach a writer.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,

    /// 64-bit signed integer; booleans travel as 0/1.
    Int(i64),

    Float(f64),

    Text(String),

    Bytes(Vec<u8>),

    /// Exact numeric already rounded to its column scale.
    Decimal(Decimal),

    Date(NaiveDate),

    DateTime(NaiveDateTime),

    Time(NaiveTime),
}

/// One row, values in column declaration order.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    /// Copy a borrowed SQLite value out of a result row. TEXT cells holding
    /// invalid UTF-8 are kept byte for byte as `Bytes`.
    pub fn from_sqlite(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Int(i),
            ValueRef::Real(f) => SqlValue::Float(f),
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(s) => SqlValue::Text(s.to_owned()),
                Err(_) => SqlValue::Bytes(t.to_vec()),
            },
            ValueRef::Blob(b) => SqlValue::Bytes(b.to_vec()),
        }
    }

    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short storage-class name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Int(_) => "integer",
            SqlValue::Float(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "blob",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Date(_) => "date",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::Time(_) => "time",
        }
    }

    /// JSON rendering for row previews. Blobs become lowercase hex.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Int(i) => serde_json::Value::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(f.to_string())),
            SqlValue::Text(s) => serde_json::Value::String(s.clone()),
            SqlValue::Bytes(b) => serde_json::Value::String(hex::encode(b)),
            SqlValue::Decimal(d) => serde_json::Value::String(d.to_string()),
            SqlValue::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            SqlValue::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            SqlValue::Time(t) => serde_json::Value::String(t.format("%H:%M:%S%.f").to_string()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

/// A batch of rows read from one source table.
#[derive(Debug)]
pub struct Batch {
    /// Rows in this batch (owned for channel transfer).
    pub rows: Vec<Row>,

    /// Zero-based source offset of the first row, for diagnostics.
    pub offset: u64,
}

impl Batch {
    pub fn new(rows: Vec<Row>, offset: u64) -> Self {
        Self { rows, offset }
    }

    /// Get the number of rows in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sqlite_storage_classes() {
        assert_eq!(SqlValue::from_sqlite(ValueRef::Null), SqlValue::Null);
        assert_eq!(SqlValue::from_sqlite(ValueRef::Integer(7)), SqlValue::Int(7));
        assert_eq!(
            SqlValue::from_sqlite(ValueRef::Text(b"abc")),
            SqlValue::Text("abc".into())
        );
        assert_eq!(
            SqlValue::from_sqlite(ValueRef::Blob(&[0xde, 0xad])),
            SqlValue::Bytes(vec![0xde, 0xad])
        );
    }

    #[test]
    fn test_invalid_utf8_text_is_not_replaced() {
        assert_eq!(
            SqlValue::from_sqlite(ValueRef::Text(&[b'o', 0xff, b'k'])),
            SqlValue::Bytes(vec![b'o', 0xff, b'k'])
        );
    }

    #[test]
    fn test_to_json_hex_blob() {
        assert_eq!(
            SqlValue::Bytes(vec![0x01, 0xab]).to_json(),
            serde_json::json!("01ab")
        );
        assert_eq!(SqlValue::Int(3).to_json(), serde_json::json!(3));
        assert!(SqlValue::Null.to_json().is_null());
    }

    #[test]
    fn test_batch_operations() {
        let batch = Batch::new(
            vec![
                vec![SqlValue::Int(1), "a".into()],
                vec![SqlValue::Int(2), "b".into()],
            ],
            1000,
        );
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert_eq!(batch.offset, 1000);
    }
}
