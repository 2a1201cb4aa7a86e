//! Per-table migration plans.
//!
//! A plan fixes everything the target needs for a table before any data
//! moves: mapped columns, primary key, secondary indexes, foreign keys and
//! the warnings produced along the way. Tables that cannot be represented in
//! MySQL are reported as [`MigrateError::SchemaIncompatibility`] and left out.

mod order;

pub use order::{dependency_layers, TableOrder};

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::dialect::MAX_IDENTIFIER_LEN;
use crate::error::{MigrateError, Result};
use crate::source::{ForeignKeyDescriptor, SourceSchema, TableDescriptor};
use crate::typemap::{map_table, TargetColumnSpec};

/// Prefix length for TEXT/BLOB columns in indexes.
pub const LOB_INDEX_PREFIX: u32 = 255;

/// One column of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: String,
    pub prefix: Option<u32>,
}

/// Secondary index to create after the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPlan {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
}

impl IndexPlan {
    /// Non-unique replacement used when the unique index is rejected.
    pub fn non_unique_fallback(&self) -> IndexPlan {
        IndexPlan {
            name: fit_identifier(&format!("{}_non_unique", self.name)),
            columns: self.columns.clone(),
            unique: false,
        }
    }
}

/// Foreign key to add once every table is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyPlan {
    pub name: String,
    /// Referenced columns resolved (never empty).
    pub fk: ForeignKeyDescriptor,
}

/// Everything needed to create and load one target table.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub name: String,
    pub source: TableDescriptor,
    pub columns: Vec<TargetColumnSpec>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexPlan>,
    pub foreign_keys: Vec<ForeignKeyPlan>,
    pub warnings: Vec<String>,
}

impl TablePlan {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Plans for a whole source, in dependency order.
#[derive(Debug)]
pub struct MigrationPlan {
    /// Plannable tables in catalogue order.
    pub tables: Vec<TablePlan>,

    /// Layers of indices into `tables`.
    pub order: TableOrder,

    /// Tables left out, one `SchemaIncompatibility` each.
    pub skipped: Vec<MigrateError>,

    /// Plan-level warnings (cycles, dropped foreign keys).
    pub warnings: Vec<String>,
}

impl MigrationPlan {
    /// Plans parents-first.
    pub fn ordered(&self) -> Vec<&TablePlan> {
        self.order
            .sequence()
            .into_iter()
            .map(|i| &self.tables[i])
            .collect()
    }

    pub fn table(&self, name: &str) -> Option<&TablePlan> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Shorten an identifier to MySQL's limit, keeping it unique with a hash.
pub fn fit_identifier(name: &str) -> String {
    if name.chars().count() <= MAX_IDENTIFIER_LEN {
        return name.to_string();
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let head: String = name.chars().take(MAX_IDENTIFIER_LEN - 9).collect();
    format!("{}_{}", head, &digest[..8])
}

/// Plan one table without cross-table information (foreign keys are
/// resolved by [`build_plan`]).
pub fn plan_table(table: &TableDescriptor) -> Result<TablePlan> {
    if table.columns.is_empty() {
        return Err(MigrateError::incompatible(&table.name, "table has no columns"));
    }
    if table.name.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(MigrateError::incompatible(
            &table.name,
            format!("name exceeds {} characters", MAX_IDENTIFIER_LEN),
        ));
    }
    if let Some(col) = table
        .columns
        .iter()
        .find(|c| c.name.chars().count() > MAX_IDENTIFIER_LEN)
    {
        return Err(MigrateError::incompatible(
            &table.name,
            format!(
                "column name '{}' exceeds {} characters",
                col.name, MAX_IDENTIFIER_LEN
            ),
        ));
    }

    let columns = map_table(table);
    let primary_key: Vec<String> = table.primary_key().iter().map(|c| c.name.clone()).collect();

    if let Some(spec) = columns
        .iter()
        .find(|c| primary_key.contains(&c.name) && c.target_type.is_blob())
    {
        return Err(MigrateError::incompatible(
            &table.name,
            format!("primary key column '{}' is a BLOB", spec.name),
        ));
    }

    let warnings: Vec<String> = columns
        .iter()
        .filter_map(|c| c.warning.as_ref())
        .map(|w| format!("{}.{}", table.name, w))
        .collect();

    let mut indexes = Vec::new();
    for idx in &table.indexes {
        if idx.columns == primary_key {
            debug!("{}: index {} duplicates the primary key", table.name, idx.name);
            continue;
        }
        let mut cols = Vec::with_capacity(idx.columns.len());
        for name in &idx.columns {
            match columns.iter().find(|c| &c.name == name) {
                Some(spec) => cols.push(IndexColumn {
                    name: name.clone(),
                    prefix: spec.target_type.is_lob().then_some(LOB_INDEX_PREFIX),
                }),
                None => {
                    debug!("{}: index {} names unknown column {}", table.name, idx.name, name);
                    cols.clear();
                    break;
                }
            }
        }
        if cols.is_empty() {
            continue;
        }
        indexes.push(IndexPlan {
            name: fit_identifier(&idx.name),
            columns: cols,
            unique: idx.unique,
        });
    }

    Ok(TablePlan {
        name: table.name.clone(),
        source: table.clone(),
        columns,
        primary_key,
        indexes,
        foreign_keys: Vec::new(),
        warnings,
    })
}

/// Plan every table of a source and order them by dependency.
pub fn build_plan(schema: &SourceSchema) -> MigrationPlan {
    let mut tables = Vec::new();
    let mut skipped = Vec::new();
    let mut warnings = Vec::new();

    for table in &schema.tables {
        match plan_table(table) {
            Ok(plan) => tables.push(plan),
            Err(e) => {
                warn!("{}", e);
                skipped.push(e);
            }
        }
    }

    let planned: HashSet<String> = tables.iter().map(|t| t.name.clone()).collect();
    let resolved: Vec<Vec<ForeignKeyPlan>> = tables
        .iter()
        .map(|plan| resolve_foreign_keys(plan, schema, &planned, &mut warnings))
        .collect();
    for (plan, fks) in tables.iter_mut().zip(resolved) {
        plan.foreign_keys = fks;
    }

    let descriptors: Vec<&TableDescriptor> = tables.iter().map(|t| &t.source).collect();
    let order = dependency_layers(&descriptors);
    if !order.cyclic.is_empty() {
        warnings.push(format!(
            "Foreign key cycle between {}; tables load in declaration order and constraints are added after the load",
            order.cyclic.join(", ")
        ));
    }

    MigrationPlan {
        tables,
        order,
        skipped,
        warnings,
    }
}

fn resolve_foreign_keys(
    plan: &TablePlan,
    schema: &SourceSchema,
    planned: &HashSet<String>,
    warnings: &mut Vec<String>,
) -> Vec<ForeignKeyPlan> {
    let mut used = HashSet::new();
    let mut out = Vec::new();

    for fk in &plan.source.foreign_keys {
        if !planned.contains(&fk.ref_table) {
            warnings.push(format!(
                "{}: foreign key on ({}) references '{}', which is not migrated",
                plan.name,
                fk.columns.join(", "),
                fk.ref_table
            ));
            continue;
        }

        let mut resolved = fk.clone();
        if resolved.ref_columns.is_empty() {
            resolved.ref_columns = schema
                .table(&fk.ref_table)
                .map(|t| t.primary_key().iter().map(|c| c.name.clone()).collect())
                .unwrap_or_default();
        }
        if resolved.ref_columns.len() != resolved.columns.len() {
            warnings.push(format!(
                "{}: foreign key on ({}) to '{}' has mismatched columns, skipped",
                plan.name,
                fk.columns.join(", "),
                fk.ref_table
            ));
            continue;
        }

        let mut name = fit_identifier(&format!("fk_{}_{}", plan.name, fk.columns.join("_")));
        if !used.insert(name.clone()) {
            name = fit_identifier(&format!("fk_{}_{}_{}", plan.name, fk.columns.join("_"), fk.id));
            used.insert(name.clone());
        }
        out.push(ForeignKeyPlan { name, fk: resolved });
    }
    out
}
