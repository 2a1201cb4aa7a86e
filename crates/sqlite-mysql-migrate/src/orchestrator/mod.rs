//! Migration orchestrator - job lifecycle and table scheduling.
//!
//! Each migration runs as a detached task reporting into its own
//! [`JobRecord`]; callers poll [`MigrationOrchestrator::status`] for
//! snapshots. Tables of one dependency layer load concurrently, bounded by
//! the configured worker count.

mod job;
mod registry;

pub use job::{JobRecord, JobSnapshot, JobStatus};
pub use registry::JobRegistry;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::{ConnectionConfig, EngineConfig, MigrationOptions, MigrationRequest};
use crate::connection::{self, ConnectionTestResult};
use crate::core::{SourceStore, TargetConnector, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::export::{SqlExport, SqlExportGenerator};
use crate::plan::{build_plan, MigrationPlan, TablePlan};
use crate::source::{SourceSchema, SqliteSource, UploadDirectory};
use crate::target::MysqlConnector;
use crate::transfer::{TransferConfig, TransferEngine, TransferResult};

/// Returned when a migration is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStarted {
    pub migration_id: String,
}

/// Per-table outcome kept for constraint creation and validation.
#[derive(Debug, Clone)]
struct TableOutcome {
    name: String,
    transfer: TransferResult,
}

/// Runs migration jobs and answers the source-side queries.
#[derive(Clone)]
pub struct MigrationOrchestrator {
    config: Arc<EngineConfig>,
    registry: Arc<JobRegistry>,
    store: Arc<dyn SourceStore>,
    connector: Arc<dyn TargetConnector>,
}

impl MigrationOrchestrator {
    pub fn new(
        config: EngineConfig,
        registry: Arc<JobRegistry>,
        store: Arc<dyn SourceStore>,
        connector: Arc<dyn TargetConnector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            store,
            connector,
        }
    }

    /// Orchestrator reading uploads from `upload_dir` and writing to MySQL.
    pub fn with_defaults(config: EngineConfig) -> Self {
        let store = Arc::new(UploadDirectory::new(config.get_upload_dir()));
        let connector = Arc::new(MysqlConnector::from_config(&config));
        Self::new(config, Arc::new(JobRegistry::new()), store, connector)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Fill unset duplicate hints from the engine config.
    fn with_config_hints(&self, mut options: MigrationOptions) -> MigrationOptions {
        if options.unique_key_hints.is_empty() {
            options.unique_key_hints = self.config.get_unique_key_hints();
        }
        options
    }

    fn job(&self, id: &str) -> Result<Arc<JobRecord>> {
        self.registry
            .get(id)
            .ok_or_else(|| MigrateError::JobNotFound(id.to_string()))
    }

    fn open_source(&self, file_id: &str) -> Result<SqliteSource> {
        SqliteSource::open(self.store.resolve(file_id)?)
    }

    /// Validate the request, register a job and start it in the background.
    ///
    /// Malformed requests are rejected here and never create a job.
    pub fn start_migration(&self, request: MigrationRequest) -> Result<MigrationStarted> {
        request.connection.validate()?;
        let options = self.with_config_hints(request.options()?);

        // Bad handles are caller errors; a missing or unreadable file fails
        // the job instead.
        let source_path = match self.store.resolve(&request.sqlite_file_id) {
            Err(e @ MigrateError::Validation(_)) => return Err(e),
            other => other,
        };

        let id = uuid::Uuid::new_v4().to_string();
        let job = Arc::new(JobRecord::new(
            id.clone(),
            request.sqlite_file_id.clone(),
            request.connection.redacted(),
        ));
        self.registry.insert(job.clone());
        job.log(format!(
            "Migration created: {} -> {}",
            job.source_ref(),
            job.target()
        ));

        let this = self.clone();
        let connection = request.connection;
        tokio::spawn(async move {
            let worker = {
                let this = this.clone();
                let job = job.clone();
                tokio::spawn(async move { this.run(&job, source_path, connection, options).await })
            };
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(MigrateError::Cancelled)) => job.fail("Migration cancelled"),
                Ok(Err(e)) => job.fail(e.to_string()),
                Err(e) => {
                    error!(job_id = %job.id(), "Migration task panicked: {}", e);
                    job.fail(format!("internal error: {}", e));
                }
            }
        });

        info!("Started migration {}", id);
        Ok(MigrationStarted { migration_id: id })
    }

    /// Snapshot of a job's status, progress and log.
    pub fn status(&self, id: &str) -> Result<JobSnapshot> {
        Ok(self.job(id)?.snapshot())
    }

    /// Request cancellation. Workers stop at the next batch boundary.
    pub fn cancel(&self, id: &str) -> Result<()> {
        self.job(id)?.request_cancel();
        Ok(())
    }

    /// Wait for a job to reach a terminal status.
    pub async fn wait(&self, id: &str) -> Result<JobSnapshot> {
        let job = self.job(id)?;
        job.finished().await;
        Ok(job.snapshot())
    }

    /// Drop terminal jobs already observed by a poller.
    pub fn purge_observed(&self, max_age: Duration) -> usize {
        self.registry.purge_observed(max_age)
    }

    /// Structural snapshot of an uploaded source.
    pub async fn schema(&self, file_id: &str) -> Result<SourceSchema> {
        let source = self.open_source(file_id)?;
        blocking(move || source.introspect()).await
    }

    /// One page of rows from an uploaded source.
    pub async fn preview(
        &self,
        file_id: &str,
        table: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let source = self.open_source(file_id)?;
        let table = table.to_string();
        blocking(move || source.preview(&table, limit, offset)).await
    }

    /// Render an uploaded source as a SQL script.
    pub async fn export(&self, file_id: &str, options: MigrationOptions) -> Result<SqlExport> {
        let source = self.open_source(file_id)?;
        let options = self.with_config_hints(options);
        let read_batch = self.config.get_batch_size();
        let rows_per_insert = self.config.get_export_batch_rows();
        blocking(move || {
            let plan = build_plan(&source.introspect()?);
            SqlExportGenerator::new(source, read_batch, rows_per_insert).export(&plan, &options)
        })
        .await
    }

    /// Check target connectivity without starting a job.
    pub async fn test_connection(&self, conn: &ConnectionConfig) -> Result<ConnectionTestResult> {
        let timeout = Duration::from_secs(self.config.get_connect_timeout_secs());
        connection::test_connection(conn, timeout).await
    }

    /// Body of one job. Business outcomes end the job here; errors are
    /// turned into a failure by the caller.
    async fn run(
        &self,
        job: &Arc<JobRecord>,
        source_path: Result<PathBuf>,
        connection: ConnectionConfig,
        options: MigrationOptions,
    ) -> Result<()> {
        let started = Instant::now();
        job.advance(JobStatus::Analyzing);
        job.set_progress(self.config.get_analyzing_progress());

        let source = SqliteSource::open(source_path?)?;
        let schema = {
            let source = source.clone();
            blocking(move || source.introspect()).await?
        };
        job.log(format!(
            "Source has {} tables ({} rows)",
            schema.len(),
            schema.total_rows()
        ));
        check_cancelled(job)?;

        let target = self
            .connector
            .connect(&connection, self.config.get_workers())
            .await?;
        job.log(format!("Connected to target {}", job.target()));

        let result = self
            .migrate(job, source, &schema, target.clone(), &options, started)
            .await;
        target.close().await;
        result
    }

    async fn migrate(
        &self,
        job: &Arc<JobRecord>,
        source: SqliteSource,
        schema: &SourceSchema,
        target: Arc<dyn TargetWriter>,
        options: &MigrationOptions,
        started: Instant,
    ) -> Result<()> {
        if schema.is_empty() {
            job.warn("Source contains no tables; nothing to migrate");
            job.complete("Migration finished: 0 tables migrated");
            return Ok(());
        }

        let plan = build_plan(schema);
        for skipped in &plan.skipped {
            job.warn(skipped.to_string());
        }
        for warning in plan
            .warnings
            .iter()
            .chain(plan.tables.iter().flat_map(|t| t.warnings.iter()))
        {
            job.warn(warning.clone());
        }
        if plan.tables.is_empty() {
            job.fail(format!(
                "No table could be migrated ({} skipped)",
                plan.skipped.len()
            ));
            return Ok(());
        }
        check_cancelled(job)?;

        job.advance(JobStatus::Migrating);
        job.set_progress(migrating_progress(&plan, 0));
        job.log(format!("Migrating {} tables", plan.tables.len()));

        let outcomes = self
            .transfer_tables(job, source, &plan, target.clone(), options)
            .await?;
        if outcomes.is_empty() {
            job.fail("No table could be migrated");
            return Ok(());
        }
        check_cancelled(job)?;

        let migrated: HashSet<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        self.create_constraints(job, &plan, &migrated, target.as_ref())
            .await;
        if options.include_data {
            validate_row_counts(job, &outcomes, target.as_ref()).await;
        }

        let total = |f: fn(&TransferResult) -> u64| -> u64 {
            outcomes.iter().map(|o| f(&o.transfer)).sum()
        };
        let failed = plan.tables.len() - outcomes.len();
        job.log(format!(
            "Summary: {} tables migrated, {} failed, {} skipped; {} rows written, {} duplicates removed, {} rows skipped",
            outcomes.len(),
            failed,
            plan.skipped.len(),
            total(|t| t.rows_written),
            total(|t| t.duplicates_removed),
            total(|t| t.rows_skipped),
        ));

        let message = if failed + plan.skipped.len() > 0 {
            format!(
                "Migration completed with warnings in {:.1}s",
                started.elapsed().as_secs_f64()
            )
        } else {
            format!(
                "Migration completed successfully in {:.1}s",
                started.elapsed().as_secs_f64()
            )
        };
        job.complete(message);
        Ok(())
    }

    /// Recreate and load every planned table, layer by layer.
    ///
    /// Returns the tables that loaded. A failed table is logged and the
    /// others proceed; cancellation stops the whole job.
    async fn transfer_tables(
        &self,
        job: &Arc<JobRecord>,
        source: SqliteSource,
        plan: &MigrationPlan,
        target: Arc<dyn TargetWriter>,
        options: &MigrationOptions,
    ) -> Result<Vec<TableOutcome>> {
        let workers = self.config.get_workers();
        let rows_counter = Arc::new(AtomicU64::new(0));
        let engine = Arc::new(
            TransferEngine::new(
                source,
                target.clone(),
                TransferConfig::from_engine(&self.config),
            )
            .with_progress_counter(rows_counter.clone()),
        );
        let options = Arc::new(options.clone());
        let semaphore = Arc::new(Semaphore::new(workers));
        let done = Arc::new(AtomicUsize::new(0));
        let skipped = plan.skipped.len();
        let total = plan.tables.len() + skipped;

        info!(
            job_id = %job.id(),
            "Transferring {} tables in {} layers with {} workers",
            plan.tables.len(),
            plan.order.layers.len(),
            workers
        );

        let mut outcomes = Vec::with_capacity(plan.tables.len());
        for layer in &plan.order.layers {
            check_cancelled(job)?;

            let mut names = Vec::with_capacity(layer.len());
            let mut handles = Vec::with_capacity(layer.len());
            for &idx in layer {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| MigrateError::Cancelled)?;

                let table = plan.tables[idx].clone();
                let name = table.name.clone();
                let engine = engine.clone();
                let target = target.clone();
                let options = options.clone();
                let job = job.clone();
                let done = done.clone();

                let handle = tokio::spawn(async move {
                    let result = migrate_table(&engine, target.as_ref(), &table, &options, &job).await;
                    drop(permit);
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    job.set_progress(table_progress(finished + skipped, total));
                    result
                });
                names.push(name);
                handles.push(handle);
            }

            let mut cancelled = false;
            for (name, joined) in names.into_iter().zip(join_all(handles).await) {
                match joined {
                    Ok(Ok(transfer)) => outcomes.push(TableOutcome { name, transfer }),
                    Ok(Err(MigrateError::Cancelled)) => cancelled = true,
                    Ok(Err(e)) => job.warn(format!("Table {} failed: {}", name, e)),
                    Err(e) => job.warn(format!("Table {} task panicked: {}", name, e)),
                }
            }
            if cancelled {
                return Err(MigrateError::Cancelled);
            }
        }

        debug!(
            job_id = %job.id(),
            "Transfer phase wrote {} rows",
            rows_counter.load(Ordering::Relaxed)
        );
        Ok(outcomes)
    }

    /// Secondary indexes, then foreign keys between migrated tables.
    /// Failures become warnings.
    async fn create_constraints(
        &self,
        job: &JobRecord,
        plan: &MigrationPlan,
        migrated: &HashSet<&str>,
        target: &dyn TargetWriter,
    ) {
        let tables: Vec<&TablePlan> = plan
            .ordered()
            .into_iter()
            .filter(|t| migrated.contains(t.name.as_str()))
            .collect();

        let mut indexes = 0usize;
        for table in &tables {
            for index in &table.indexes {
                match target.create_index(&table.name, index).await {
                    Ok(()) => indexes += 1,
                    Err(e) if index.unique => {
                        let fallback = index.non_unique_fallback();
                        match target.create_index(&table.name, &fallback).await {
                            Ok(()) => {
                                indexes += 1;
                                job.warn(format!(
                                    "Unique index {} on {} rejected ({}); created non-unique index {}",
                                    index.name, table.name, e, fallback.name
                                ));
                            }
                            Err(e2) => job.warn(format!(
                                "Index {} on {} not created: {}",
                                index.name, table.name, e2
                            )),
                        }
                    }
                    Err(e) => job.warn(format!(
                        "Index {} on {} not created: {}",
                        index.name, table.name, e
                    )),
                }
            }
        }

        let mut foreign_keys = 0usize;
        for table in &tables {
            for fk in &table.foreign_keys {
                if !migrated.contains(fk.fk.ref_table.as_str()) {
                    job.warn(format!(
                        "Foreign key {} on {} skipped: {} was not migrated",
                        fk.name, table.name, fk.fk.ref_table
                    ));
                    continue;
                }
                match target.create_foreign_key(&table.name, &fk.name, &fk.fk).await {
                    Ok(()) => foreign_keys += 1,
                    Err(e) => job.warn(format!(
                        "Foreign key {} on {} not created: {}",
                        fk.name, table.name, e
                    )),
                }
            }
        }

        if indexes + foreign_keys > 0 {
            job.log(format!(
                "Created {} indexes and {} foreign keys",
                indexes, foreign_keys
            ));
        }
    }
}

async fn migrate_table(
    engine: &TransferEngine,
    target: &dyn TargetWriter,
    table: &TablePlan,
    options: &MigrationOptions,
    job: &JobRecord,
) -> Result<TransferResult> {
    check_cancelled(job)?;
    job.log(format!(
        "Processing table {} ({} rows)",
        table.name, table.source.record_count
    ));
    target.recreate_table(table).await?;

    if !options.include_data {
        job.log(format!("Table {} created (schema only)", table.name));
        return Ok(TransferResult::default());
    }

    let result = engine
        .transfer_table(table, options, job.cancel_token())
        .await?;
    for message in &result.errors {
        job.warn(message.clone());
    }
    let mut line = format!(
        "Table {} migrated: {} rows written",
        table.name, result.rows_written
    );
    if result.duplicates_removed > 0 {
        line.push_str(&format!(", {} duplicates removed", result.duplicates_removed));
    }
    if result.rows_skipped > 0 {
        line.push_str(&format!(", {} rows skipped", result.rows_skipped));
    }
    job.log(line);
    Ok(result)
}

/// Compare expected and actual target row counts per migrated table.
async fn validate_row_counts(job: &JobRecord, outcomes: &[TableOutcome], target: &dyn TargetWriter) {
    let mut mismatches = 0usize;
    for outcome in outcomes {
        let t = &outcome.transfer;
        let expected = t
            .rows_read
            .saturating_sub(t.duplicates_removed)
            .saturating_sub(t.rows_skipped);
        match target.row_count(&outcome.name).await {
            Ok(actual) if actual == expected => {}
            Ok(actual) => {
                mismatches += 1;
                job.warn(format!(
                    "Row count mismatch for {}: expected {}, found {}",
                    outcome.name, expected, actual
                ));
            }
            Err(e) => {
                mismatches += 1;
                job.warn(format!("Could not count rows of {}: {}", outcome.name, e));
            }
        }
    }
    if mismatches == 0 {
        job.log(format!("Row counts validated for {} tables", outcomes.len()));
    }
}

fn check_cancelled(job: &JobRecord) -> Result<()> {
    if job.is_cancelled() {
        Err(MigrateError::Cancelled)
    } else {
        Ok(())
    }
}

/// Progress once `finished` planned tables are done. Tables left out of
/// the plan count as finished.
fn migrating_progress(plan: &MigrationPlan, finished: usize) -> u8 {
    let skipped = plan.skipped.len();
    table_progress(finished + skipped, plan.tables.len() + skipped)
}

/// `round(100 * finished / total)`.
fn table_progress(finished: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((finished as f64 * 100.0 / total as f64).round() as u64).min(100) as u8
}

/// Run blocking SQLite work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MigrateError::SourceUnreadable(format!("source task failed: {}", e)))?
}
