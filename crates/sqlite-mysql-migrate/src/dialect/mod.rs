//! MySQL SQL dialect.
//!
//! Statement rendering shared by the live writer and the SQL export, so both
//! paths produce the same DDL.

use chrono::{DateTime, TimeZone};

use crate::core::SqlValue;
use crate::plan::{IndexPlan, TablePlan};
use crate::source::ForeignKeyDescriptor;
use crate::typemap::TargetColumnSpec;

/// MySQL max placeholders per prepared statement.
pub const MYSQL_MAX_PLACEHOLDERS: usize = 65535;

/// MySQL identifier length limit.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Statements run at the start of every session and export script.
/// Foreign key checks are off so tables load in any order, and an explicit
/// 0 in an AUTO_INCREMENT column is stored as 0 rather than renumbered.
pub const SESSION_SETUP: &[&str] = &[
    "SET NAMES utf8mb4",
    "SET FOREIGN_KEY_CHECKS=0",
    "SET SESSION sql_mode = CONCAT(@@sql_mode, ',NO_AUTO_VALUE_ON_ZERO')",
];

/// Quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a string literal with MySQL backslash escapes.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\0' => out.push_str("\\0"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Render a value as a SQL literal for scripts.
pub fn literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) if f.is_finite() => {
            let s = f.to_string();
            if s.contains(['.', 'e', 'E']) {
                s
            } else {
                format!("{}.0", s)
            }
        }
        SqlValue::Float(_) => "NULL".to_string(),
        SqlValue::Text(s) => quote_string(s),
        SqlValue::Bytes(b) if b.is_empty() => "''".to_string(),
        SqlValue::Bytes(b) => format!("X'{}'", hex::encode(b)),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        SqlValue::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        SqlValue::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
    }
}

/// Column clause inside CREATE TABLE.
pub fn column_definition(spec: &TargetColumnSpec) -> String {
    let mut def = format!("{} {}", quote_ident(&spec.name), spec.target_type.sql());
    if !spec.nullable {
        def.push_str(" NOT NULL");
    }
    if spec.auto_increment {
        def.push_str(" AUTO_INCREMENT");
    }
    if let Some(default) = &spec.default {
        def.push_str(" DEFAULT ");
        def.push_str(default.sql());
    }
    def
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

/// Generate table DDL.
pub fn create_table_sql(plan: &TablePlan) -> String {
    let mut defs: Vec<String> = plan.columns.iter().map(column_definition).collect();
    if !plan.primary_key.is_empty() {
        let pk: Vec<String> = plan.primary_key.iter().map(|c| quote_ident(c)).collect();
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }

    format!(
        "CREATE TABLE {} (\n    {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        quote_ident(&plan.name),
        defs.join(",\n    ")
    )
}

pub fn create_index_sql(table: &str, idx: &IndexPlan) -> String {
    let cols: Vec<String> = idx
        .columns
        .iter()
        .map(|c| match c.prefix {
            Some(n) => format!("{}({})", quote_ident(&c.name), n),
            None => quote_ident(&c.name),
        })
        .collect();
    let unique = if idx.unique { "UNIQUE " } else { "" };

    format!(
        "CREATE {}INDEX {} ON {} ({})",
        unique,
        quote_ident(&idx.name),
        quote_ident(table),
        cols.join(", ")
    )
}

pub fn add_foreign_key_sql(table: &str, name: &str, fk: &ForeignKeyDescriptor) -> String {
    let cols: Vec<String> = fk.columns.iter().map(|c| quote_ident(c)).collect();
    let ref_cols: Vec<String> = fk.ref_columns.iter().map(|c| quote_ident(c)).collect();

    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
        quote_ident(table),
        quote_ident(name),
        cols.join(", "),
        quote_ident(&fk.ref_table),
        ref_cols.join(", "),
        map_referential_action(&fk.on_delete),
        map_referential_action(&fk.on_update)
    )
}

/// Map a SQLite referential action. InnoDB rejects SET DEFAULT.
pub fn map_referential_action(action: &str) -> &'static str {
    match action.trim().to_uppercase().as_str() {
        "CASCADE" => "CASCADE",
        "SET NULL" => "SET NULL",
        "RESTRICT" => "RESTRICT",
        _ => "NO ACTION",
    }
}

/// Rows per INSERT so a statement stays under the placeholder limit.
pub fn max_rows_per_insert(num_cols: usize) -> usize {
    (MYSQL_MAX_PLACEHOLDERS / num_cols.max(1)).max(1)
}

/// Parameterized multi-row INSERT for `rows` rows.
pub fn insert_placeholders_sql(table: &str, cols: &[String], rows: usize) -> String {
    let col_list: Vec<String> = cols.iter().map(|c| quote_ident(c)).collect();
    let row = format!("({})", vec!["?"; cols.len()].join(", "));
    let all: Vec<String> = std::iter::repeat(row).take(rows).collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        col_list.join(", "),
        all.join(", ")
    )
}

/// Multi-row INSERT with inline literals, for scripts.
pub fn insert_literal_sql(table: &str, cols: &[String], rows: &[Vec<SqlValue>]) -> String {
    let col_list: Vec<String> = cols.iter().map(|c| quote_ident(c)).collect();
    let values: Vec<String> = rows
        .iter()
        .map(|row| {
            let vals: Vec<String> = row.iter().map(literal).collect();
            format!("({})", vals.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES\n{};",
        quote_ident(table),
        col_list.join(", "),
        values.join(",\n")
    )
}

pub fn row_count_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(table))
}

/// `migration_YYYYMMDD_HHMMSS.sql`
pub fn export_file_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("migration_{}.sql", at.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::IndexColumn;
    use crate::typemap::{DefaultValue, TargetType};
    use chrono::{NaiveDate, Utc};

    fn spec(name: &str, target_type: TargetType) -> TargetColumnSpec {
        TargetColumnSpec {
            name: name.into(),
            target_type,
            nullable: true,
            auto_increment: false,
            default: None,
            warning: None,
        }
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("name"), "`name`");
        assert_eq!(quote_ident("table`name"), "`table``name`");
    }

    #[test]
    fn test_session_setup_keeps_zero_keys() {
        assert!(SESSION_SETUP
            .iter()
            .any(|s| s.contains("NO_AUTO_VALUE_ON_ZERO") && s.contains("@@sql_mode")));
        assert!(SESSION_SETUP.contains(&"SET FOREIGN_KEY_CHECKS=0"));
    }

    #[test]
    fn test_quote_string_escapes() {
        assert_eq!(quote_string("plain"), "'plain'");
        assert_eq!(quote_string("it's"), "'it\\'s'");
        assert_eq!(quote_string("a\\b\nc\0"), "'a\\\\b\\nc\\0'");
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal(&SqlValue::Null), "NULL");
        assert_eq!(literal(&SqlValue::Int(-3)), "-3");
        assert_eq!(literal(&SqlValue::Float(2.0)), "2.0");
        assert_eq!(literal(&SqlValue::Float(0.25)), "0.25");
        assert_eq!(literal(&SqlValue::Bytes(vec![0xca, 0xfe])), "X'cafe'");
        assert_eq!(literal(&SqlValue::Bytes(vec![])), "''");
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(literal(&SqlValue::Date(d)), "'2024-02-29'");
        assert_eq!(
            literal(&SqlValue::DateTime(d.and_hms_opt(13, 5, 0).unwrap())),
            "'2024-02-29 13:05:00'"
        );
    }

    #[test]
    fn test_column_definition() {
        let mut id = spec("id", TargetType::BigInt);
        id.nullable = false;
        id.auto_increment = true;
        assert_eq!(column_definition(&id), "`id` BIGINT NOT NULL AUTO_INCREMENT");

        let mut created = spec("created", TargetType::DateTime);
        created.default = Some(DefaultValue::CurrentTimestamp);
        assert_eq!(
            column_definition(&created),
            "`created` DATETIME DEFAULT CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_create_index_with_prefix() {
        let idx = IndexPlan {
            name: "idx_body".into(),
            columns: vec![
                IndexColumn {
                    name: "org_id".into(),
                    prefix: None,
                },
                IndexColumn {
                    name: "body".into(),
                    prefix: Some(255),
                },
            ],
            unique: true,
        };
        assert_eq!(
            create_index_sql("note", &idx),
            "CREATE UNIQUE INDEX `idx_body` ON `note` (`org_id`, `body`(255))"
        );
    }

    #[test]
    fn test_foreign_key_sql() {
        let fk = ForeignKeyDescriptor {
            id: 0,
            columns: vec!["org_id".into()],
            ref_table: "org".into(),
            ref_columns: vec!["id".into()],
            on_delete: "SET DEFAULT".into(),
            on_update: "CASCADE".into(),
        };
        assert_eq!(
            add_foreign_key_sql("user", "fk_user_org_id", &fk),
            "ALTER TABLE `user` ADD CONSTRAINT `fk_user_org_id` FOREIGN KEY (`org_id`) REFERENCES `org` (`id`) ON DELETE NO ACTION ON UPDATE CASCADE"
        );
    }

    #[test]
    fn test_insert_sql() {
        let cols = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            insert_placeholders_sql("t", &cols, 2),
            "INSERT INTO `t` (`a`, `b`) VALUES (?, ?), (?, ?)"
        );
        assert_eq!(
            insert_literal_sql("t", &cols, &[vec![SqlValue::Int(1), "x".into()]]),
            "INSERT INTO `t` (`a`, `b`) VALUES\n(1, 'x');"
        );
        assert_eq!(max_rows_per_insert(3), 21845);
        assert_eq!(max_rows_per_insert(0), 65535);
    }

    #[test]
    fn test_export_file_name() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(export_file_name(&at), "migration_20240102_030405.sql");
    }
}
