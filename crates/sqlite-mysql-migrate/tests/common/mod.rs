//! Shared fixtures: an in-memory target and SQLite upload builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use sqlite_mysql_migrate::config::ConnectionConfig;
use sqlite_mysql_migrate::core::{Row, TargetConnector, TargetWriter};
use sqlite_mysql_migrate::plan::{IndexPlan, TablePlan};
use sqlite_mysql_migrate::source::ForeignKeyDescriptor;
use sqlite_mysql_migrate::{
    EngineConfig, JobRegistry, MigrateError, MigrationOrchestrator, MigrationRequest, Result,
    UploadDirectory,
};
use tempfile::TempDir;

/// Target that keeps tables in memory.
#[derive(Default)]
pub struct MemoryTarget {
    pub tables: Mutex<HashMap<String, Vec<Row>>>,
    pub indexes: Mutex<Vec<String>>,
    pub foreign_keys: Mutex<Vec<String>>,
    /// Sleep before committing each batch.
    pub batch_delay: Duration,
    /// Unique index names the target rejects.
    pub reject_unique: Vec<String>,
    pub closed: Mutex<bool>,
}

impl MemoryTarget {
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn recreate_table(&self, plan: &TablePlan) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .insert(plan.name.clone(), Vec::new());
        Ok(())
    }

    async fn create_index(&self, _table: &str, index: &IndexPlan) -> Result<()> {
        if index.unique && self.reject_unique.contains(&index.name) {
            return Err(MigrateError::Target(format!(
                "Duplicate entry for key '{}'",
                index.name
            )));
        }
        self.indexes.lock().unwrap().push(index.name.clone());
        Ok(())
    }

    async fn create_foreign_key(
        &self,
        _table: &str,
        name: &str,
        _fk: &ForeignKeyDescriptor,
    ) -> Result<()> {
        self.foreign_keys.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn write_batch(&self, table: &str, _cols: &[String], rows: &[Row]) -> Result<u64> {
        if !self.batch_delay.is_zero() {
            tokio::time::sleep(self.batch_delay).await;
        }
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        Ok(self.rows(table).len() as u64)
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Hands out one shared [`MemoryTarget`], or refuses every connection.
pub struct MemoryConnector {
    pub target: Arc<MemoryTarget>,
    pub refuse: bool,
}

#[async_trait]
impl TargetConnector for MemoryConnector {
    async fn connect(
        &self,
        conn: &ConnectionConfig,
        _pool_size: usize,
    ) -> Result<Arc<dyn TargetWriter>> {
        if self.refuse {
            return Err(MigrateError::Connectivity(format!(
                "{}: authentication failed for user '{}'",
                conn.redacted(),
                conn.user
            )));
        }
        Ok(self.target.clone())
    }
}

pub struct Harness {
    pub uploads: TempDir,
    pub target: Arc<MemoryTarget>,
    pub orchestrator: MigrationOrchestrator,
}

impl Harness {
    pub fn new(target: MemoryTarget) -> Self {
        Self::with_config(target, EngineConfig::default(), false)
    }

    pub fn with_config(target: MemoryTarget, config: EngineConfig, refuse: bool) -> Self {
        let uploads = TempDir::new().unwrap();
        let target = Arc::new(target);
        let connector = Arc::new(MemoryConnector {
            target: target.clone(),
            refuse,
        });
        let orchestrator = MigrationOrchestrator::new(
            config,
            Arc::new(JobRegistry::new()),
            Arc::new(UploadDirectory::new(uploads.path())),
            connector,
        );
        Self {
            uploads,
            target,
            orchestrator,
        }
    }

    /// Create `<id>.db` in the upload directory from a SQL script.
    pub fn upload(&self, id: &str, sql: &str) {
        create_sqlite(&self.uploads.path().join(format!("{}.db", id)), sql);
    }
}

pub fn create_sqlite(path: &Path, sql: &str) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(sql).unwrap();
}

pub fn request(file_id: &str) -> MigrationRequest {
    MigrationRequest {
        sqlite_file_id: file_id.to_string(),
        connection: ConnectionConfig {
            host: "db.internal".into(),
            port: 3306,
            user: "grafana".into(),
            password: "s3cret".into(),
            database: "grafana".into(),
        },
        include_data: true,
        resolve_duplicates: true,
        duplicate_strategy: "remove".into(),
    }
}

/// Script inserting `n` rows into `big(id INTEGER PRIMARY KEY, payload TEXT)`.
pub fn big_table_sql(n: usize) -> String {
    let mut sql = String::from(
        "CREATE TABLE big (id INTEGER PRIMARY KEY, payload TEXT);
         WITH RECURSIVE seq(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM seq WHERE x < ",
    );
    sql.push_str(&n.to_string());
    sql.push_str(") INSERT INTO big SELECT x, 'row ' || x FROM seq;");
    sql
}
