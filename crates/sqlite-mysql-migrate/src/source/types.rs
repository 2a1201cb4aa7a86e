//! Schema and metadata types.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

/// Immutable snapshot of a source database's structure.
///
/// Tables keep catalogue order. Serializes as the schema query result:
/// an ordered map of table name to `{record_count, columns}`.
#[derive(Debug, Clone, Default)]
pub struct SourceSchema {
    pub tables: Vec<TableDescriptor>,
}

impl SourceSchema {
    pub fn new(tables: Vec<TableDescriptor>) -> Self {
        Self { tables }
    }

    /// Look up a table by exact name.
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total rows across all tables.
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.record_count).sum()
    }
}

impl Serialize for SourceSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tables.len()))?;
        for table in &self.tables {
            map.serialize_entry(&table.name, &TableSummary(table))?;
        }
        map.end()
    }
}

struct TableSummary<'a>(&'a TableDescriptor);

impl Serialize for TableSummary<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let columns: Vec<ColumnSummary<'_>> = self.0.columns.iter().map(ColumnSummary).collect();
        let mut s = serializer.serialize_struct("TableSummary", 2)?;
        s.serialize_field("record_count", &self.0.record_count)?;
        s.serialize_field("columns", &columns)?;
        s.end()
    }
}

struct ColumnSummary<'a>(&'a ColumnDescriptor);

impl Serialize for ColumnSummary<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ColumnSummary", 4)?;
        s.serialize_field("name", &self.0.name)?;
        s.serialize_field("type", &self.0.declared_type)?;
        s.serialize_field("pk", &self.0.is_primary_key)?;
        s.serialize_field("notnull", &!self.0.nullable)?;
        s.end()
    }
}

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,

    /// Column definitions in declaration order.
    pub columns: Vec<ColumnDescriptor>,

    /// Exact row count at introspection time.
    pub record_count: u64,

    /// Secondary indexes (primary key index excluded).
    pub indexes: Vec<IndexDescriptor>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl TableDescriptor {
    /// Primary key columns ordered by their position inside the key.
    pub fn primary_key(&self) -> Vec<&ColumnDescriptor> {
        let mut pk: Vec<&ColumnDescriptor> =
            self.columns.iter().filter(|c| c.is_primary_key).collect();
        pk.sort_by_key(|c| c.pk_position);
        pk
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        self.columns.iter().any(|c| c.is_primary_key)
    }

    /// Check if the table has a single-column primary key.
    pub fn has_single_pk(&self) -> bool {
        self.columns.iter().filter(|c| c.is_primary_key).count() == 1
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Tables referenced by foreign keys, excluding self references.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self
            .foreign_keys
            .iter()
            .map(|fk| fk.ref_table.as_str())
            .filter(|t| *t != self.name)
            .collect();
        refs.sort_unstable();
        refs.dedup();
        refs
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Declared type as written in the DDL; may be empty.
    pub declared_type: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    pub is_primary_key: bool,

    /// 1-based position inside the primary key, 0 when not part of it.
    pub pk_position: u32,

    /// Ordinal position (0-based).
    pub ordinal_position: usize,

    /// Raw default expression, if any.
    pub default_value: Option<String>,
}

/// Index metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexDescriptor {
    /// Index name.
    pub name: String,

    /// Indexed column names.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub unique: bool,
}

/// Foreign key metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    /// SQLite constraint id within the table.
    pub id: i64,

    /// Source column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names (empty means the referenced primary key).
    pub ref_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: String,

    /// ON UPDATE action.
    pub on_update: String,
}
