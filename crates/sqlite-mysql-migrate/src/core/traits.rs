//! Core traits at the engine's seams.
//!
//! - [`TargetWriter`]: writes schema and data to the target database
//! - [`TargetConnector`]: opens a pooled [`TargetWriter`] for a connection config
//! - [`SourceStore`]: resolves an uploaded source handle to a local file
//!
//! The orchestrator only talks to these traits, so tests can run whole jobs
//! against an in-memory target.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::plan::{IndexPlan, TablePlan};
use crate::source::ForeignKeyDescriptor;

use super::value::Row;

/// Write schema and data to a target database.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    // ===== Schema Operations =====

    /// Drop the table if it exists and create it from the plan.
    async fn recreate_table(&self, plan: &TablePlan) -> Result<()>;

    /// Create a secondary index.
    async fn create_index(&self, table: &str, index: &IndexPlan) -> Result<()>;

    /// Add a foreign key constraint.
    async fn create_foreign_key(
        &self,
        table: &str,
        name: &str,
        fk: &ForeignKeyDescriptor,
    ) -> Result<()>;

    // ===== Data Operations =====

    /// Insert rows inside a single transaction. Either every row is
    /// committed or none is.
    async fn write_batch(&self, table: &str, cols: &[String], rows: &[Row]) -> Result<u64>;

    // ===== Utility Operations =====

    /// Get the row count for a table.
    async fn row_count(&self, table: &str) -> Result<u64>;

    /// Get the database type identifier (e.g., "mysql").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// Open target connections.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    /// Connect and verify the target, returning a writer whose pool holds at
    /// most `pool_size` connections.
    async fn connect(
        &self,
        conn: &ConnectionConfig,
        pool_size: usize,
    ) -> Result<Arc<dyn TargetWriter>>;
}

/// Resolve opaque source handles to SQLite files on disk.
pub trait SourceStore: Send + Sync {
    fn resolve(&self, file_id: &str) -> Result<PathBuf>;
}
