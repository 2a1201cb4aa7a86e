//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use sysinfo::System;
use tracing::info;

use crate::error::{MigrateError, Result};

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len();

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Engine-wide settings shared by every job.
/// Fields left as `None` fall back to defaults or auto-tuned values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Concurrent table workers per job; also the target pool size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Rows per source read and per target transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Batches buffered between the source reader and the writer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_ahead_batches: Option<usize>,

    /// Attempts per batch before a transient failure fails the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Base delay for exponential backoff between attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,

    /// Timeout for connection checks and pool creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    /// Directory holding uploaded SQLite files (`<id>.db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_dir: Option<PathBuf>,

    /// Rows per INSERT statement in SQL exports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_batch_rows: Option<usize>,

    /// Progress reported while a job is analyzing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzing_progress: Option<u8>,

    /// Extra unique column sets checked during duplicate resolution, per
    /// table. Hints apply even to single-column primary-key tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_key_hints: Option<HashMap<String, Vec<Vec<String>>>>,

    /// Add the well-known Grafana unique columns to `unique_key_hints`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana_hints: Option<bool>,
}

impl EngineConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();

        if self.workers.is_none() {
            self.workers = Some((resources.cpu_cores / 2).clamp(1, 8));
        }

        info!(
            "Auto-tuned config: workers={}, batch_size={}, read_ahead={}",
            self.get_workers(),
            self.get_batch_size(),
            self.get_read_ahead_batches()
        );
        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(4)
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(1_000)
    }

    pub fn get_read_ahead_batches(&self) -> usize {
        self.read_ahead_batches.unwrap_or(2)
    }

    pub fn get_max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(5)
    }

    pub fn get_retry_base_delay_ms(&self) -> u64 {
        self.retry_base_delay_ms.unwrap_or(200)
    }

    pub fn get_connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs.unwrap_or(5)
    }

    pub fn get_upload_dir(&self) -> PathBuf {
        self.upload_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("uploads"))
    }

    pub fn get_export_batch_rows(&self) -> usize {
        self.export_batch_rows.unwrap_or(100)
    }

    pub fn get_analyzing_progress(&self) -> u8 {
        self.analyzing_progress.unwrap_or(5)
    }

    pub fn get_grafana_hints(&self) -> bool {
        self.grafana_hints.unwrap_or(false)
    }

    /// Configured hints, plus the Grafana ones when enabled. Explicit
    /// entries win for tables named in both.
    pub fn get_unique_key_hints(&self) -> HashMap<String, Vec<Vec<String>>> {
        let mut hints = if self.get_grafana_hints() {
            crate::dedup::grafana_unique_hints()
        } else {
            HashMap::new()
        };
        if let Some(configured) = &self.unique_key_hints {
            hints.extend(configured.clone());
        }
        hints
    }
}

/// Target database (MySQL) connection settings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u32,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Database name.
    pub database: String,
}

impl ConnectionConfig {
    /// Diagnostic form without the password.
    pub fn redacted(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }

    /// Port as u16; only meaningful after validation.
    pub fn port_u16(&self) -> u16 {
        u16::try_from(self.port).unwrap_or(0)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .finish()
    }
}

/// Policy deciding which of several equal rows survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateStrategy {
    /// Drop every row after the first occurrence.
    #[default]
    Remove,

    /// Same semantics as `Remove`, accepted for callers that name it explicitly.
    KeepFirst,
}

impl DuplicateStrategy {
    /// Parse the wire value. Only first-occurrence strategies are supported.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "remove" => Ok(DuplicateStrategy::Remove),
            "keep-first" | "keep_first" => Ok(DuplicateStrategy::KeepFirst),
            other => Err(MigrateError::Validation(format!(
                "unsupported duplicate_strategy '{}' (expected 'remove' or 'keep-first')",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateStrategy::Remove => "remove",
            DuplicateStrategy::KeepFirst => "keep-first",
        }
    }
}

/// Per-job behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Copy rows, not just the schema.
    #[serde(default = "default_true")]
    pub include_data: bool,

    /// Drop duplicate rows in flight.
    #[serde(default = "default_true")]
    pub resolve_duplicates: bool,

    #[serde(default)]
    pub duplicate_strategy: DuplicateStrategy,

    /// Extra uniqueness keys per table (column sets) checked during resolution.
    #[serde(default)]
    pub unique_key_hints: HashMap<String, Vec<Vec<String>>>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            include_data: true,
            resolve_duplicates: true,
            duplicate_strategy: DuplicateStrategy::Remove,
            unique_key_hints: HashMap::new(),
        }
    }
}

/// Migration request as received from a caller.
#[derive(Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    /// Handle of an uploaded SQLite file.
    pub sqlite_file_id: String,

    pub connection: ConnectionConfig,

    #[serde(default = "default_true")]
    pub include_data: bool,

    #[serde(default = "default_true")]
    pub resolve_duplicates: bool,

    #[serde(default = "default_remove")]
    pub duplicate_strategy: String,
}

impl fmt::Debug for MigrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRequest")
            .field("sqlite_file_id", &self.sqlite_file_id)
            .field("connection", &self.connection)
            .field("include_data", &self.include_data)
            .field("resolve_duplicates", &self.resolve_duplicates)
            .field("duplicate_strategy", &self.duplicate_strategy)
            .finish()
    }
}

impl MigrationRequest {
    /// Convert the wire options into typed options.
    pub fn options(&self) -> Result<MigrationOptions> {
        Ok(MigrationOptions {
            include_data: self.include_data,
            resolve_duplicates: self.resolve_duplicates,
            duplicate_strategy: DuplicateStrategy::parse(&self.duplicate_strategy)?,
            unique_key_hints: HashMap::new(),
        })
    }
}

// Default value functions for serde
fn default_mysql_port() -> u32 {
    3306
}

fn default_true() -> bool {
    true
}

fn default_remove() -> String {
    "remove".to_string()
}
