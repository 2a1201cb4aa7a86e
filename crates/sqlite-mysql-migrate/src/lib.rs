//! # sqlite-mysql-migrate
//!
//! SQLite to MySQL migration engine.
//!
//! This library provides the core functionality for moving an uploaded
//! SQLite database into MySQL with support for:
//!
//! - **Background jobs** with pollable status, progress and logs
//! - **Type mapping** from SQLite's declared types to MySQL column types
//! - **Duplicate resolution** in flight, without touching the source file
//! - **Parallel transfers** of independent tables with a bounded worker pool
//! - **SQL export** of the same plan as a standalone script
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_mysql_migrate::{ConnectionConfig, EngineConfig, MigrationOrchestrator, MigrationRequest};
//!
//! #[tokio::main]
//! async fn main() -> sqlite_mysql_migrate::Result<()> {
//!     let orchestrator = MigrationOrchestrator::with_defaults(EngineConfig::load("config.yaml")?);
//!     let started = orchestrator.start_migration(MigrationRequest {
//!         sqlite_file_id: "grafana".into(),
//!         connection: ConnectionConfig {
//!             host: "localhost".into(),
//!             port: 3306,
//!             user: "grafana".into(),
//!             password: "secret".into(),
//!             database: "grafana".into(),
//!         },
//!         include_data: true,
//!         resolve_duplicates: true,
//!         duplicate_strategy: "remove".into(),
//!     })?;
//!     let done = orchestrator.wait(&started.migration_id).await?;
//!     println!("{}: {}%", done.status, done.progress);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod core;
pub mod dedup;
pub mod dialect;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod plan;
pub mod source;
pub mod target;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use config::{
    ConnectionConfig, DuplicateStrategy, EngineConfig, MigrationOptions, MigrationRequest,
};
pub use connection::{test_connection, ConnectionTestResult};
pub use crate::core::{Batch, Row, SourceStore, SqlValue, TargetConnector, TargetWriter};
pub use error::{MigrateError, Result};
pub use export::{SqlExport, SqlExportGenerator};
pub use orchestrator::{JobRegistry, JobSnapshot, JobStatus, MigrationOrchestrator, MigrationStarted};
pub use plan::{build_plan, MigrationPlan, TablePlan};
pub use source::{SourceSchema, SqliteSource, UploadDirectory};
pub use target::{MysqlConnector, MysqlWriter};
pub use transfer::{TransferConfig, TransferEngine, TransferResult};
