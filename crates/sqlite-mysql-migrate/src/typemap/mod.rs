//! Type mapping between SQLite and MySQL.
//!
//! SQLite declared types are hints, so they are first classified into the
//! closed [`TypeTag`] set, and [`map_column`] is a total function over that
//! set. Anything unrecognized lands on [`TypeTag::Unknown`] and maps to
//! LONGTEXT with a warning.

use serde::Serialize;
use tracing::debug;

use crate::dialect::quote_string;
use crate::source::{ColumnDescriptor, TableDescriptor};

/// Largest VARCHAR length (utf8mb4 row size limit).
pub const MAX_VARCHAR: u32 = 16_383;
const MAX_TEXT: u32 = 65_535;
const MAX_MEDIUMTEXT: u32 = 16_777_215;
const MAX_BLOB: u32 = 65_535;
/// Length used for textual key columns so the target can index them.
pub const KEY_VARCHAR: u32 = 255;

/// Length given to VARCHAR columns declared without one.
pub const DEFAULT_VARCHAR: u32 = 255;

/// Recognized source type categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Integer,
    TinyInt,
    SmallInt,
    MediumInt,
    BigInt,
    UnsignedBigInt,
    Boolean,
    /// REAL, DOUBLE, DOUBLE PRECISION and FLOAT.
    Real,
    /// NUMERIC/DECIMAL with optional (precision, scale).
    Numeric(Option<(u32, u32)>),
    Date,
    DateTime,
    Timestamp,
    Time,
    /// Fixed-width character type with optional length.
    Char(Option<u32>),
    /// Variable-width character type with optional length.
    Varchar(Option<u32>),
    /// TEXT, CLOB and JSON.
    Text,
    Blob(Option<u32>),
    /// Empty or unrecognized declaration.
    Unknown,
}

impl TypeTag {
    /// Classify a declared type: exact names first, then SQLite's affinity
    /// substring rules.
    pub fn parse(declared: &str) -> Self {
        let upper = declared.trim().to_uppercase();
        let (base, params) = split_params(&upper);

        match base.as_str() {
            "" => TypeTag::Unknown,
            "INTEGER" | "INT" => TypeTag::Integer,
            "TINYINT" => TypeTag::TinyInt,
            "SMALLINT" | "INT2" => TypeTag::SmallInt,
            "MEDIUMINT" => TypeTag::MediumInt,
            "BIGINT" | "INT8" => TypeTag::BigInt,
            "UNSIGNED BIG INT" => TypeTag::UnsignedBigInt,
            "BOOLEAN" | "BOOL" => TypeTag::Boolean,
            "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" => TypeTag::Real,
            "NUMERIC" | "DECIMAL" => TypeTag::Numeric(match params.as_slice() {
                [p] => Some((*p, 0)),
                [p, s, ..] => Some((*p, *s)),
                [] => None,
            }),
            "DATE" => TypeTag::Date,
            "DATETIME" => TypeTag::DateTime,
            "TIMESTAMP" => TypeTag::Timestamp,
            "TIME" => TypeTag::Time,
            "CHAR" | "CHARACTER" | "NCHAR" => TypeTag::Char(params.first().copied()),
            "VARCHAR" | "NVARCHAR" | "VARYING CHARACTER" | "NATIVE CHARACTER" => {
                TypeTag::Varchar(params.first().copied())
            }
            "TEXT" | "CLOB" | "JSON" => TypeTag::Text,
            "BLOB" => TypeTag::Blob(params.first().copied()),
            other => {
                if other.contains("INT") {
                    TypeTag::Integer
                } else if other.contains("CHAR") || other.contains("CLOB") || other.contains("TEXT")
                {
                    match params.first() {
                        Some(&n) => TypeTag::Varchar(Some(n)),
                        None => TypeTag::Text,
                    }
                } else if other.contains("BLOB") {
                    TypeTag::Blob(params.first().copied())
                } else if other.contains("REAL") || other.contains("FLOA") || other.contains("DOUB")
                {
                    TypeTag::Real
                } else {
                    TypeTag::Unknown
                }
            }
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TypeTag::Integer
                | TypeTag::TinyInt
                | TypeTag::SmallInt
                | TypeTag::MediumInt
                | TypeTag::BigInt
                | TypeTag::UnsignedBigInt
        )
    }
}

/// Split `VARCHAR ( 255 )` into `("VARCHAR", [255])`, collapsing whitespace
/// in the base name. Unparseable parameters are dropped.
fn split_params(upper: &str) -> (String, Vec<u32>) {
    let (base, rest) = match upper.find('(') {
        Some(i) => (&upper[..i], &upper[i + 1..]),
        None => (upper, ""),
    };
    let base = base.split_whitespace().collect::<Vec<_>>().join(" ");
    let inner = rest.split(')').next().unwrap_or("");
    let params = inner
        .split(',')
        .filter_map(|p| p.trim().parse::<u32>().ok())
        .collect();
    (base, params)
}

/// MySQL column types produced by the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetType {
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    BigIntUnsigned,
    /// TINYINT(1), values normalized to 0/1.
    Boolean,
    Double,
    Decimal { precision: u32, scale: u32 },
    Date,
    DateTime,
    Time,
    Char(u32),
    Varchar(u32),
    Text,
    MediumText,
    LongText,
    Blob,
    LongBlob,
}

impl TargetType {
    /// DDL spelling.
    pub fn sql(&self) -> String {
        match self {
            TargetType::TinyInt => "TINYINT".into(),
            TargetType::SmallInt => "SMALLINT".into(),
            TargetType::MediumInt => "MEDIUMINT".into(),
            TargetType::Int => "INT".into(),
            TargetType::BigInt => "BIGINT".into(),
            TargetType::BigIntUnsigned => "BIGINT UNSIGNED".into(),
            TargetType::Boolean => "TINYINT(1)".into(),
            TargetType::Double => "DOUBLE".into(),
            TargetType::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
            TargetType::Date => "DATE".into(),
            TargetType::DateTime => "DATETIME".into(),
            TargetType::Time => "TIME".into(),
            TargetType::Char(n) => format!("CHAR({})", n),
            TargetType::Varchar(n) => format!("VARCHAR({})", n),
            TargetType::Text => "TEXT".into(),
            TargetType::MediumText => "MEDIUMTEXT".into(),
            TargetType::LongText => "LONGTEXT".into(),
            TargetType::Blob => "BLOB".into(),
            TargetType::LongBlob => "LONGBLOB".into(),
        }
    }

    /// TEXT/BLOB family: no defaults, indexed with a prefix length.
    pub fn is_lob(&self) -> bool {
        matches!(
            self,
            TargetType::Text
                | TargetType::MediumText
                | TargetType::LongText
                | TargetType::Blob
                | TargetType::LongBlob
        )
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, TargetType::Blob | TargetType::LongBlob)
    }

    /// Declared length, if the type has one.
    pub fn length(&self) -> Option<u32> {
        match self {
            TargetType::Char(n) | TargetType::Varchar(n) => Some(*n),
            _ => None,
        }
    }

    /// (precision, scale) for exact numerics.
    pub fn precision(&self) -> Option<(u32, u32)> {
        match self {
            TargetType::Decimal { precision, scale } => Some((*precision, *scale)),
            _ => None,
        }
    }

    /// Maximum character count for textual types.
    pub fn char_capacity(&self) -> Option<u64> {
        match self {
            TargetType::Char(n) | TargetType::Varchar(n) => Some(*n as u64),
            TargetType::Text => Some(MAX_TEXT as u64),
            TargetType::MediumText => Some(MAX_MEDIUMTEXT as u64),
            _ => None,
        }
    }

    /// Maximum byte count for binary types.
    pub fn byte_capacity(&self) -> Option<u64> {
        match self {
            TargetType::Blob => Some(MAX_BLOB as u64),
            _ => None,
        }
    }
}

/// Column default carried into the target DDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DefaultValue {
    CurrentTimestamp,
    /// Already rendered as a MySQL literal.
    Literal(String),
}

impl DefaultValue {
    pub fn sql(&self) -> &str {
        match self {
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP",
            DefaultValue::Literal(s) => s,
        }
    }
}

/// Mapped definition of one target column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetColumnSpec {
    pub name: String,
    pub target_type: TargetType,
    pub nullable: bool,
    pub auto_increment: bool,
    pub default: Option<DefaultValue>,
    /// Set when the mapping is lossy or fell back.
    pub warning: Option<String>,
}

impl TargetColumnSpec {
    pub fn length(&self) -> Option<u32> {
        self.target_type.length()
    }

    pub fn precision(&self) -> Option<(u32, u32)> {
        self.target_type.precision()
    }
}

/// Map a column on its own; a primary key column is treated as a
/// single-column key.
pub fn map_column(col: &ColumnDescriptor) -> TargetColumnSpec {
    map_column_in(col, usize::from(col.is_primary_key))
}

/// Map a column inside a table whose primary key has `pk_width` columns.
pub fn map_column_in(col: &ColumnDescriptor, pk_width: usize) -> TargetColumnSpec {
    let tag = TypeTag::parse(&col.declared_type);
    let single_pk = col.is_primary_key && pk_width == 1;
    let mut warning = None;

    let target_type = match tag {
        t if t.is_integer() && single_pk => TargetType::BigInt,
        TypeTag::Integer => TargetType::Int,
        TypeTag::TinyInt => TargetType::TinyInt,
        TypeTag::SmallInt => TargetType::SmallInt,
        TypeTag::MediumInt => TargetType::MediumInt,
        TypeTag::BigInt => TargetType::BigInt,
        TypeTag::UnsignedBigInt => TargetType::BigIntUnsigned,
        TypeTag::Boolean => TargetType::Boolean,
        TypeTag::Real => TargetType::Double,
        TypeTag::Numeric(Some((p, s))) => {
            let precision = p.clamp(1, 65);
            let scale = s.min(30).min(precision);
            if (precision, scale) != (p, s) {
                warning = Some(format!(
                    "{}: DECIMAL({},{}) clamped to DECIMAL({},{})",
                    col.name, p, s, precision, scale
                ));
            }
            TargetType::Decimal { precision, scale }
        }
        TypeTag::Numeric(None) => {
            warning = Some(format!(
                "{}: {} declared without precision, using DECIMAL(10,5)",
                col.name,
                display_type(&col.declared_type)
            ));
            TargetType::Decimal {
                precision: 10,
                scale: 5,
            }
        }
        TypeTag::Date => TargetType::Date,
        TypeTag::DateTime | TypeTag::Timestamp => TargetType::DateTime,
        TypeTag::Time => TargetType::Time,
        TypeTag::Char(Some(n)) if n > 0 && n <= 255 => TargetType::Char(n),
        TypeTag::Varchar(None) => TargetType::Varchar(DEFAULT_VARCHAR),
        TypeTag::Char(len) | TypeTag::Varchar(len) => text_by_length(len),
        TypeTag::Text => TargetType::LongText,
        TypeTag::Blob(Some(n)) if n <= MAX_BLOB => TargetType::Blob,
        TypeTag::Blob(_) => TargetType::LongBlob,
        TypeTag::Unknown => {
            warning = Some(format!(
                "{}: unrecognized type {}, using LONGTEXT",
                col.name,
                display_type(&col.declared_type)
            ));
            TargetType::LongText
        }
    };

    // Key columns must be indexable.
    let target_type = if col.is_primary_key && is_text_family(target_type) {
        match target_type {
            TargetType::Char(_) => target_type,
            TargetType::Varchar(n) if n <= KEY_VARCHAR => target_type,
            _ => {
                if let TypeTag::Char(Some(n)) | TypeTag::Varchar(Some(n)) = tag {
                    warning = Some(format!(
                        "{}: key column of length {} shortened to VARCHAR({})",
                        col.name, n, KEY_VARCHAR
                    ));
                }
                TargetType::Varchar(KEY_VARCHAR)
            }
        }
    } else {
        target_type
    };

    let auto_increment = single_pk && tag.is_integer();
    let default = if auto_increment {
        None
    } else {
        map_default(col, target_type)
    };

    TargetColumnSpec {
        name: col.name.clone(),
        target_type,
        nullable: col.nullable && !col.is_primary_key,
        auto_increment,
        default,
        warning,
    }
}

/// Map every column of a table, preserving order.
pub fn map_table(table: &TableDescriptor) -> Vec<TargetColumnSpec> {
    let pk_width = table.columns.iter().filter(|c| c.is_primary_key).count();
    table
        .columns
        .iter()
        .map(|c| map_column_in(c, pk_width))
        .collect()
}

fn display_type(declared: &str) -> String {
    if declared.trim().is_empty() {
        "(none)".to_string()
    } else {
        format!("'{}'", declared.trim())
    }
}

fn is_text_family(t: TargetType) -> bool {
    matches!(
        t,
        TargetType::Char(_)
            | TargetType::Varchar(_)
            | TargetType::Text
            | TargetType::MediumText
            | TargetType::LongText
    )
}

fn text_by_length(len: Option<u32>) -> TargetType {
    match len {
        Some(n) if n > 0 && n <= MAX_VARCHAR => TargetType::Varchar(n),
        Some(n) if n > 0 && n <= MAX_TEXT => TargetType::Text,
        Some(n) if n > 0 && n <= MAX_MEDIUMTEXT => TargetType::MediumText,
        _ => TargetType::LongText,
    }
}

/// Carry over representable defaults; everything else is dropped.
fn map_default(col: &ColumnDescriptor, target: TargetType) -> Option<DefaultValue> {
    let raw = col.default_value.as_deref()?.trim();
    if target.is_lob() {
        debug!("{}: default {} dropped for {}", col.name, raw, target.sql());
        return None;
    }

    let mut value = raw;
    while value.starts_with('(') && value.ends_with(')') && value.len() >= 2 {
        value = value[1..value.len() - 1].trim();
    }
    let upper = value.to_uppercase();

    if upper == "NULL" {
        return None;
    }
    if upper == "CURRENT_TIMESTAMP" {
        return match target {
            TargetType::DateTime => Some(DefaultValue::CurrentTimestamp),
            _ => {
                debug!("{}: CURRENT_TIMESTAMP default dropped for {}", col.name, target.sql());
                None
            }
        };
    }
    if target == TargetType::Boolean {
        match upper.as_str() {
            "TRUE" => return Some(DefaultValue::Literal("1".into())),
            "FALSE" => return Some(DefaultValue::Literal("0".into())),
            _ => {}
        }
    }
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        let inner = value[1..value.len() - 1].replace("''", "'");
        return Some(DefaultValue::Literal(quote_string(&inner)));
    }
    if is_numeric_literal(value) {
        return Some(DefaultValue::Literal(value.to_string()));
    }

    debug!("{}: unsupported default {} dropped", col.name, raw);
    None
}

fn is_numeric_literal(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    !digits.is_empty()
        && digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.matches('.').count() <= 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            declared_type: ty.to_string(),
            nullable: true,
            is_primary_key: false,
            pk_position: 0,
            ordinal_position: 0,
            default_value: None,
        }
    }

    fn pk(name: &str, ty: &str, position: u32) -> ColumnDescriptor {
        ColumnDescriptor {
            is_primary_key: true,
            pk_position: position,
            nullable: false,
            ..col(name, ty)
        }
    }

    fn with_default(mut c: ColumnDescriptor, d: &str) -> ColumnDescriptor {
        c.default_value = Some(d.to_string());
        c
    }

    #[test]
    fn test_parse_exact_names() {
        assert_eq!(TypeTag::parse("integer"), TypeTag::Integer);
        assert_eq!(TypeTag::parse("UNSIGNED  BIG INT"), TypeTag::UnsignedBigInt);
        assert_eq!(TypeTag::parse("varchar(190)"), TypeTag::Varchar(Some(190)));
        assert_eq!(TypeTag::parse("DECIMAL(12, 2)"), TypeTag::Numeric(Some((12, 2))));
        assert_eq!(TypeTag::parse("NUMERIC"), TypeTag::Numeric(None));
        assert_eq!(TypeTag::parse("json"), TypeTag::Text);
        assert_eq!(TypeTag::parse(""), TypeTag::Unknown);
    }

    #[test]
    fn test_parse_affinity_rules() {
        assert_eq!(TypeTag::parse("UNSIGNED INTEGER"), TypeTag::Integer);
        assert_eq!(TypeTag::parse("VARYING CHARACTER(40)"), TypeTag::Varchar(Some(40)));
        assert_eq!(TypeTag::parse("LONGTEXT"), TypeTag::Text);
        assert_eq!(TypeTag::parse("CHARACTER VARYING(40)"), TypeTag::Varchar(Some(40)));
        assert_eq!(TypeTag::parse("FLOAT8"), TypeTag::Real);
        assert_eq!(TypeTag::parse("FLOATING POINT"), TypeTag::Integer);
        assert_eq!(TypeTag::parse("MYBLOB"), TypeTag::Blob(None));
        assert_eq!(TypeTag::parse("GEOMETRY"), TypeTag::Unknown);
    }

    #[test]
    fn test_integer_types() {
        assert_eq!(map_column(&col("n", "INTEGER")).target_type, TargetType::Int);
        assert_eq!(map_column(&col("n", "INT8")).target_type, TargetType::BigInt);
        assert_eq!(map_column(&col("n", "SMALLINT")).target_type, TargetType::SmallInt);
        assert_eq!(
            map_column(&col("n", "UNSIGNED BIG INT")).target_type.sql(),
            "BIGINT UNSIGNED"
        );
    }

    #[test]
    fn test_single_integer_pk_promoted() {
        let spec = map_column(&pk("id", "INTEGER", 1));
        assert_eq!(spec.target_type, TargetType::BigInt);
        assert!(spec.auto_increment);
        assert!(!spec.nullable);

        let spec = map_column(&pk("id", "TINYINT", 1));
        assert_eq!(spec.target_type, TargetType::BigInt);
        assert!(spec.auto_increment);
    }

    #[test]
    fn test_composite_pk_not_auto_increment() {
        let table = TableDescriptor {
            name: "member".into(),
            columns: vec![pk("user_id", "INTEGER", 1), pk("team_id", "INTEGER", 2)],
            record_count: 0,
            indexes: vec![],
            foreign_keys: vec![],
        };
        let specs = map_table(&table);
        assert!(specs.iter().all(|s| !s.auto_increment));
        assert!(specs.iter().all(|s| s.target_type == TargetType::Int));
    }

    #[test]
    fn test_text_size_classes() {
        assert_eq!(map_column(&col("s", "VARCHAR(190)")).target_type, TargetType::Varchar(190));
        assert_eq!(map_column(&col("s", "VARCHAR(20000)")).target_type, TargetType::Text);
        assert_eq!(
            map_column(&col("s", "VARCHAR(100000)")).target_type,
            TargetType::MediumText
        );
        assert_eq!(map_column(&col("s", "VARCHAR")).target_type, TargetType::Varchar(255));
        assert_eq!(map_column(&col("s", "NVARCHAR")).target_type, TargetType::Varchar(255));
        assert_eq!(map_column(&col("s", "LONGTEXT")).target_type, TargetType::LongText);
        assert_eq!(map_column(&col("s", "TEXT")).target_type, TargetType::LongText);
        assert_eq!(map_column(&col("s", "CHAR(2)")).target_type, TargetType::Char(2));
    }

    #[test]
    fn test_textual_pk_indexable() {
        let spec = map_column(&pk("uid", "TEXT", 1));
        assert_eq!(spec.target_type, TargetType::Varchar(KEY_VARCHAR));
        assert!(!spec.auto_increment);
        assert!(spec.warning.is_none());

        let spec = map_column(&pk("uid", "VARCHAR(1000)", 1));
        assert_eq!(spec.target_type, TargetType::Varchar(KEY_VARCHAR));
        assert!(spec.warning.is_some());

        let spec = map_column(&pk("uid", "VARCHAR(40)", 1));
        assert_eq!(spec.target_type, TargetType::Varchar(40));
    }

    #[test]
    fn test_blob_size_classes() {
        assert_eq!(map_column(&col("b", "BLOB")).target_type, TargetType::LongBlob);
        assert_eq!(map_column(&col("b", "BLOB(1024)")).target_type, TargetType::Blob);
    }

    #[test]
    fn test_numeric_mapping() {
        let spec = map_column(&col("price", "DECIMAL(12,2)"));
        assert_eq!(spec.target_type.sql(), "DECIMAL(12,2)");
        assert!(spec.warning.is_none());

        let spec = map_column(&col("ratio", "NUMERIC"));
        assert_eq!(spec.precision(), Some((10, 5)));
        assert!(spec.warning.is_some());

        let spec = map_column(&col("huge", "DECIMAL(80,40)"));
        assert_eq!(spec.precision(), Some((65, 30)));
        assert!(spec.warning.is_some());
    }

    #[test]
    fn test_boolean_and_real() {
        assert_eq!(map_column(&col("flag", "BOOLEAN")).target_type.sql(), "TINYINT(1)");
        assert_eq!(map_column(&col("x", "FLOAT")).target_type, TargetType::Double);
        assert_eq!(map_column(&col("x", "DOUBLE PRECISION")).target_type, TargetType::Double);
    }

    #[test]
    fn test_unknown_falls_back_with_warning() {
        let spec = map_column(&col("payload", ""));
        assert_eq!(spec.target_type, TargetType::LongText);
        assert!(spec.warning.as_deref().unwrap().contains("(none)"));

        let spec = map_column(&col("shape", "GEOMETRY"));
        assert_eq!(spec.target_type, TargetType::LongText);
        assert!(spec.warning.is_some());
    }

    #[test]
    fn test_map_table_preserves_order() {
        let table = TableDescriptor {
            name: "t".into(),
            columns: vec![col("c", "TEXT"), col("a", "INTEGER"), col("b", "")],
            record_count: 0,
            indexes: vec![],
            foreign_keys: vec![],
        };
        let names: Vec<String> = map_table(&table).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_defaults() {
        let spec = map_column(&with_default(col("created", "DATETIME"), "CURRENT_TIMESTAMP"));
        assert_eq!(spec.default, Some(DefaultValue::CurrentTimestamp));

        let spec = map_column(&with_default(col("state", "VARCHAR(20)"), "'it''s'"));
        assert_eq!(spec.default, Some(DefaultValue::Literal("'it\\'s'".into())));

        let spec = map_column(&with_default(col("n", "INTEGER"), "(-42)"));
        assert_eq!(spec.default, Some(DefaultValue::Literal("-42".into())));

        let spec = map_column(&with_default(col("flag", "BOOLEAN"), "TRUE"));
        assert_eq!(spec.default, Some(DefaultValue::Literal("1".into())));

        let spec = map_column(&with_default(col("body", "TEXT"), "'x'"));
        assert_eq!(spec.default, None);

        let spec = map_column(&with_default(col("d", "DATE"), "CURRENT_TIMESTAMP"));
        assert_eq!(spec.default, None);

        let spec = map_column(&with_default(col("n", "INTEGER"), "abs(1)"));
        assert_eq!(spec.default, None);
    }
}
