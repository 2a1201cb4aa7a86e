//! Standalone SQL script export.
//!
//! Renders the same plan a live migration would execute as a MySQL script:
//! DDL in dependency order, optional batched INSERTs produced by the same
//! [`RowPipeline`] the transfer engine uses, then indexes and foreign keys.
//!
//! Rows the pipeline drops (duplicates, unconvertible values, converted
//! primary key collisions) are left out of the script exactly as the live
//! load leaves them out. A row the server still refuses on replay fails its
//! whole INSERT statement, where the live load would skip just that row.

use std::io::Write;

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::MigrationOptions;
use crate::dialect::{
    add_foreign_key_sql, create_index_sql, create_table_sql, drop_table_sql, export_file_name,
    insert_literal_sql, SESSION_SETUP,
};
use crate::error::Result;
use crate::plan::MigrationPlan;
use crate::source::SqliteSource;
use crate::transfer::RowPipeline;

pub const SQL_CONTENT_TYPE: &str = "application/sql";

/// Rows written for one table of an export.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExportedTable {
    pub name: String,
    pub rows: u64,
    pub rows_skipped: u64,
    pub duplicates_removed: u64,
}

/// A rendered script ready to hand to a caller as a download.
#[derive(Debug, Clone)]
pub struct SqlExport {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    pub tables: Vec<ExportedTable>,
}

/// Writes a migration plan as a SQL script.
pub struct SqlExportGenerator {
    source: SqliteSource,
    read_batch_size: usize,
    rows_per_insert: usize,
}

impl SqlExportGenerator {
    pub fn new(source: SqliteSource, read_batch_size: usize, rows_per_insert: usize) -> Self {
        Self {
            source,
            read_batch_size: read_batch_size.max(1),
            rows_per_insert: rows_per_insert.max(1),
        }
    }

    /// Render the script into memory, named after the current local time.
    pub fn export(&self, plan: &MigrationPlan, options: &MigrationOptions) -> Result<SqlExport> {
        let now = Local::now();
        let mut bytes = Vec::new();
        let tables = self.generate(plan, options, &now, &mut bytes)?;
        let file_name = export_file_name(&now);
        info!("Generated {} ({} bytes)", file_name, bytes.len());
        Ok(SqlExport {
            file_name,
            content_type: SQL_CONTENT_TYPE,
            bytes,
            tables,
        })
    }

    /// Write the script to `out`.
    pub fn generate<Tz, W>(
        &self,
        plan: &MigrationPlan,
        options: &MigrationOptions,
        generated_at: &DateTime<Tz>,
        out: &mut W,
    ) -> Result<Vec<ExportedTable>>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
        W: Write,
    {
        writeln!(out, "-- Migration from SQLite to MySQL")?;
        writeln!(out, "-- Generated: {}", generated_at.to_rfc3339())?;
        writeln!(out, "-- Tables: {}", plan.tables.len())?;
        for skipped in &plan.skipped {
            writeln!(out, "-- Skipped: {}", skipped)?;
        }
        for warning in &plan.warnings {
            writeln!(out, "-- Warning: {}", warning)?;
        }
        writeln!(out)?;
        for stmt in SESSION_SETUP {
            writeln!(out, "{};", stmt)?;
        }

        let mut exported = Vec::with_capacity(plan.tables.len());
        for table in plan.ordered() {
            writeln!(out)?;
            writeln!(out, "-- Table: {}", table.name)?;
            for warning in &table.warnings {
                writeln!(out, "-- Warning: {}", warning)?;
            }
            writeln!(out, "{};", drop_table_sql(&table.name))?;
            writeln!(out, "{};", create_table_sql(table))?;

            let mut summary = ExportedTable {
                name: table.name.clone(),
                ..Default::default()
            };
            if options.include_data {
                let columns = table.column_names();
                let mut pipeline = RowPipeline::new(table, options);
                let rows_per_insert = self.rows_per_insert;

                self.source
                    .for_each_batch(&table.source, self.read_batch_size, |batch| {
                        let rows: Vec<_> =
                            pipeline.process(batch).into_iter().map(|(_, row)| row).collect();
                        for chunk in rows.chunks(rows_per_insert) {
                            writeln!(out, "{}", insert_literal_sql(&table.name, &columns, chunk))?;
                            summary.rows += chunk.len() as u64;
                        }
                        Ok(true)
                    })?;

                summary.rows_skipped = pipeline.rows_skipped();
                summary.duplicates_removed = pipeline.duplicates_removed();
                for message in pipeline.messages() {
                    writeln!(out, "-- {}", message)?;
                }
            }
            debug!("Exported {}: {} rows", table.name, summary.rows);
            exported.push(summary);
        }

        let mut constraints = Vec::new();
        for table in plan.ordered() {
            for index in &table.indexes {
                constraints.push(create_index_sql(&table.name, index));
            }
        }
        for table in plan.ordered() {
            for fk in &table.foreign_keys {
                constraints.push(add_foreign_key_sql(&table.name, &fk.name, &fk.fk));
            }
        }
        if !constraints.is_empty() {
            writeln!(out)?;
            writeln!(out, "-- Indexes and foreign keys")?;
            for stmt in constraints {
                writeln!(out, "{};", stmt)?;
            }
        }

        writeln!(out)?;
        writeln!(out, "SET FOREIGN_KEY_CHECKS=1;")?;
        out.flush()?;
        Ok(exported)
    }
}
