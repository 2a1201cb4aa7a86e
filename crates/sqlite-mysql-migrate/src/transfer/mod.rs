//! Data transfer engine.
//!
//! Each table is streamed from the source on a blocking reader thread with
//! read-ahead buffering, filtered and coerced by a [`RowPipeline`], and
//! written to the target one batch per transaction. Batches of one table
//! are written sequentially so keep-first duplicate resolution sees rows in
//! source order.

mod batch;
mod coerce;

pub use batch::{RowPipeline, SkipLog, MAX_ROW_MESSAGES};
pub use coerce::{coerce_row, coerce_value};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, MigrationOptions};
use crate::core::{Row, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::plan::TablePlan;
use crate::source::SqliteSource;

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Rows per source batch and per target transaction.
    pub batch_size: usize,
    /// Number of read-ahead batches to buffer.
    pub read_ahead: usize,
    /// Total attempts for a batch hitting transient errors.
    pub max_retries: u32,
    /// First retry delay; doubles on each further attempt.
    pub retry_base_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

impl TransferConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            batch_size: config.get_batch_size(),
            read_ahead: config.get_read_ahead_batches(),
            max_retries: config.get_max_retries(),
            retry_base_delay: Duration::from_millis(config.get_retry_base_delay_ms()),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Outcome of one table's transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferResult {
    /// Rows read from the source.
    pub rows_read: u64,
    pub rows_written: u64,
    /// Rows dropped because they could not be coerced or were rejected by
    /// the target.
    pub rows_skipped: u64,
    pub duplicates_removed: u64,
    /// Row-level messages for the job log.
    pub errors: Vec<String>,
    pub elapsed: Duration,
}

/// Moves rows of planned tables from a SQLite source to a target writer.
pub struct TransferEngine {
    source: SqliteSource,
    target: Arc<dyn TargetWriter>,
    config: TransferConfig,
    rows_transferred: AtomicU64,
    /// Optional shared counter for real-time progress reporting.
    progress_counter: Option<Arc<AtomicU64>>,
}

impl TransferEngine {
    pub fn new(source: SqliteSource, target: Arc<dyn TargetWriter>, config: TransferConfig) -> Self {
        Self {
            source,
            target,
            config,
            rows_transferred: AtomicU64::new(0),
            progress_counter: None,
        }
    }

    /// Set a shared progress counter for real-time row tracking.
    pub fn with_progress_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.progress_counter = Some(counter);
        self
    }

    /// Total rows written by this engine across tables.
    pub fn rows_transferred(&self) -> u64 {
        self.rows_transferred.load(Ordering::Relaxed)
    }

    /// Transfer every row of one table.
    ///
    /// Cancellation is checked between batches; a batch already submitted is
    /// allowed to commit. Exhausted retries and source read failures fail the
    /// table with a [`MigrateError::Transfer`].
    pub async fn transfer_table(
        &self,
        plan: &TablePlan,
        options: &MigrationOptions,
        cancel: &CancellationToken,
    ) -> Result<TransferResult> {
        let start = Instant::now();
        let columns = plan.column_names();
        let mut pipeline = RowPipeline::new(plan, options);
        let mut result = TransferResult::default();

        info!(
            "Starting transfer for {} ({} rows, batch size {})",
            plan.name, plan.source.record_count, self.config.batch_size
        );

        let mut rx = self.source.spawn_reader(
            plan.source.clone(),
            self.config.batch_size,
            self.config.read_ahead,
        );

        loop {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
                next = rx.recv() => next,
            };
            let Some(batch) = next else { break };
            let batch = batch.map_err(|e| MigrateError::transfer(&plan.name, e.to_string()))?;

            result.rows_read += batch.len() as u64;
            let offset = batch.offset;
            let (numbers, rows): (Vec<u64>, Vec<Row>) = pipeline.process(batch).into_iter().unzip();
            if rows.is_empty() {
                continue;
            }

            let written = self
                .write_batch(&plan.name, &columns, &rows, &numbers, offset, pipeline.skip_log())
                .await?;
            result.rows_written += written;
            self.rows_transferred.fetch_add(written, Ordering::Relaxed);
            if let Some(counter) = &self.progress_counter {
                counter.fetch_add(written, Ordering::Relaxed);
            }
        }

        result.rows_skipped = pipeline.rows_skipped();
        result.duplicates_removed = pipeline.duplicates_removed();
        result.errors = pipeline.messages();
        result.elapsed = start.elapsed();

        info!(
            "{}: transferred {} rows in {:?} ({} skipped, {} duplicates removed)",
            plan.name,
            result.rows_written,
            result.elapsed,
            result.rows_skipped,
            result.duplicates_removed
        );
        Ok(result)
    }

    /// Write one batch in a transaction, retrying transient failures and
    /// falling back to row-by-row inserts when the target rejects the batch.
    /// Rows the target rejects are skipped; `numbers` holds their source
    /// positions.
    async fn write_batch(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
        numbers: &[u64],
        offset: u64,
        skips: &mut SkipLog,
    ) -> Result<u64> {
        let rejection = match self.write_with_retry(table, columns, rows).await {
            Ok(n) => return Ok(n),
            Err(e) if e.is_transient() => {
                return Err(MigrateError::transfer(
                    table,
                    format!("giving up after {} attempts: {}", self.config.max_retries, e),
                ))
            }
            Err(MigrateError::Cancelled) => return Err(MigrateError::Cancelled),
            Err(e) => e,
        };

        warn!(
            "{}: batch at offset {} rejected ({}), retrying row by row",
            table, offset, rejection
        );

        let mut written = 0u64;
        for (row, &number) in rows.iter().zip(numbers) {
            match self
                .write_with_retry(table, columns, std::slice::from_ref(row))
                .await
            {
                Ok(n) => written += n,
                Err(MigrateError::Cancelled) => return Err(MigrateError::Cancelled),
                Err(e) if e.is_transient() => {
                    return Err(MigrateError::transfer(
                        table,
                        format!("giving up after {} attempts: {}", self.config.max_retries, e),
                    ))
                }
                Err(e) => skips.record(number, e),
            }
        }
        Ok(written)
    }

    async fn write_with_retry(&self, table: &str, columns: &[String], rows: &[Row]) -> Result<u64> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.target.write_batch(table, columns, rows).await {
                Ok(n) => return Ok(n),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        "{}: transient error (attempt {}/{}), retrying in {:?}: {}",
                        table, attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("{}: write failed after {} attempts: {}", table, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}
