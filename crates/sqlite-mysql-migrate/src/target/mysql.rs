//! MySQL target writer implementation.
//!
//! Implements the `TargetWriter` trait using mysql_async for connection
//! pooling and batched multi-row INSERT inside one transaction per batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{DriverError, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, TxOpts};
use tracing::{debug, info};

use crate::config::{ConnectionConfig, EngineConfig};
use crate::connection::ConnectFailure;
use crate::core::{Row, SqlValue, TargetConnector, TargetWriter};
use crate::dialect::{
    add_foreign_key_sql, create_index_sql, create_table_sql, drop_table_sql,
    insert_placeholders_sql, max_rows_per_insert, row_count_sql, SESSION_SETUP,
};
use crate::error::{MigrateError, Result};
use crate::plan::{IndexPlan, TablePlan};
use crate::source::ForeignKeyDescriptor;

/// Server error codes worth retrying: lock wait timeout, deadlock,
/// server gone away, lost connection.
const TRANSIENT_SERVER_CODES: &[u16] = &[1205, 1213, 2006, 2013];

/// Map a mysql_async error onto the transient/non-transient split used by
/// the retry loop.
pub fn classify(err: mysql_async::Error) -> MigrateError {
    match &err {
        mysql_async::Error::Server(e) if TRANSIENT_SERVER_CODES.contains(&e.code) => {
            MigrateError::TransientTarget(err.to_string())
        }
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(DriverError::ConnectionClosed) => {
            MigrateError::TransientTarget(err.to_string())
        }
        _ => MigrateError::Target(err.to_string()),
    }
}

impl From<mysql_async::Error> for MigrateError {
    fn from(err: mysql_async::Error) -> Self {
        classify(err)
    }
}

/// MySQL target writer implementation using mysql_async.
pub struct MysqlWriter {
    pool: Pool,
    target: String,
}

impl MysqlWriter {
    /// Open a pool of at most `max_conns` connections and verify it with
    /// `SELECT 1` before returning.
    ///
    /// Any failure, including `connect_timeout` elapsing, is a
    /// [`MigrateError::Connectivity`] describing the cause.
    pub async fn connect(
        config: &ConnectionConfig,
        max_conns: usize,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let constraints = PoolConstraints::new(1, max_conns.max(1)).ok_or_else(|| {
            MigrateError::Config(format!("invalid pool size {}", max_conns))
        })?;
        let pool_opts = PoolOpts::new().with_constraints(constraints);

        let builder = OptsBuilder::default()
            .ip_or_hostname(config.host.as_str())
            .tcp_port(config.port_u16())
            .db_name(Some(config.database.as_str()))
            .user(Some(config.user.as_str()))
            .pass(Some(config.password.as_str()))
            .init(SESSION_SETUP.to_vec())
            .pool_opts(pool_opts);

        let opts: Opts = builder.into();
        let pool = Pool::new(opts);
        let target = config.redacted();

        let ping = async {
            let mut conn = pool.get_conn().await?;
            conn.query_drop("SELECT 1").await?;
            Ok::<_, mysql_async::Error>(())
        };

        let failure = match tokio::time::timeout(connect_timeout, ping).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(ConnectFailure::from_mysql(&e, config)),
            Err(_) => Some(ConnectFailure::Timeout(connect_timeout)),
        };
        if let Some(failure) = failure {
            // A timed-out handshake may still be pending; let the pool drop
            // in the background instead of waiting on it.
            drop(pool);
            return Err(MigrateError::Connectivity(format!(
                "{}: {}",
                target,
                failure.message(config)
            )));
        }

        info!("Connected to MySQL target: {}", target);
        Ok(Self { pool, target })
    }

    /// Get a clone of the underlying connection pool.
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl TargetWriter for MysqlWriter {
    async fn recreate_table(&self, plan: &TablePlan) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(drop_table_sql(&plan.name)).await?;
        conn.query_drop(create_table_sql(plan)).await?;

        debug!("Created table {} on {}", plan.name, self.target);
        Ok(())
    }

    async fn create_index(&self, table: &str, index: &IndexPlan) -> Result<()> {
        self.execute(&create_index_sql(table, index)).await?;
        debug!("Created index {} on {}", index.name, table);
        Ok(())
    }

    async fn create_foreign_key(
        &self,
        table: &str,
        name: &str,
        fk: &ForeignKeyDescriptor,
    ) -> Result<()> {
        self.execute(&add_foreign_key_sql(table, name, fk)).await?;
        debug!("Created foreign key {} on {}", name, table);
        Ok(())
    }

    async fn write_batch(&self, table: &str, cols: &[String], rows: &[Row]) -> Result<u64> {
        if rows.is_empty() || cols.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get_conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;

        for chunk in rows.chunks(max_rows_per_insert(cols.len())) {
            let sql = insert_placeholders_sql(table, cols, chunk.len());
            let params: Vec<mysql_async::Value> = chunk
                .iter()
                .flat_map(|row| row.iter().map(sql_value_to_mysql))
                .collect();
            // Dropping the transaction on error rolls it back.
            tx.exec_drop(sql, params).await?;
        }
        tx.commit().await?;

        debug!("MySQL: wrote {} rows to {}", rows.len(), table);
        Ok(rows.len() as u64)
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let mut conn = self.pool.get_conn().await?;
        let count: Option<u64> = conn.query_first(row_count_sql(table)).await?;
        Ok(count.unwrap_or(0))
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.clone().disconnect().await.ok();
    }
}

/// Opens [`MysqlWriter`]s.
#[derive(Debug, Clone)]
pub struct MysqlConnector {
    connect_timeout: Duration,
}

impl MysqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(Duration::from_secs(config.get_connect_timeout_secs()))
    }
}

#[async_trait]
impl TargetConnector for MysqlConnector {
    async fn connect(
        &self,
        conn: &ConnectionConfig,
        pool_size: usize,
    ) -> Result<Arc<dyn TargetWriter>> {
        let writer = MysqlWriter::connect(conn, pool_size, self.connect_timeout).await?;
        Ok(Arc::new(writer))
    }
}

/// Convert SqlValue to mysql_async::Value.
fn sql_value_to_mysql(value: &SqlValue) -> mysql_async::Value {
    use mysql_async::Value;

    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Int(i) => Value::Int(*i),
        SqlValue::Float(f) => Value::Double(*f),
        SqlValue::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
        SqlValue::Bytes(b) => Value::Bytes(b.clone()),
        SqlValue::Decimal(d) => Value::Bytes(d.to_string().into_bytes()),
        SqlValue::Date(d) => Value::Date(year(d.year()), d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        SqlValue::DateTime(dt) => Value::Date(
            year(dt.year()),
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
        SqlValue::Time(t) => Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
    }
}

fn year(y: i32) -> u16 {
    u16::try_from(y).unwrap_or(0)
}
