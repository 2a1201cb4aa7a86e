//! Configuration validation.

use super::{ConnectionConfig, EngineConfig};
use crate::error::{MigrateError, Result};

/// Validate target connection settings before any job is created.
pub fn validate_connection(conn: &ConnectionConfig) -> Result<()> {
    if conn.host.trim().is_empty() {
        return Err(MigrateError::Validation("connection.host is required".into()));
    }
    if conn.user.trim().is_empty() {
        return Err(MigrateError::Validation("connection.user is required".into()));
    }
    if conn.database.trim().is_empty() {
        return Err(MigrateError::Validation(
            "connection.database is required".into(),
        ));
    }
    if conn.port == 0 || conn.port > 65535 {
        return Err(MigrateError::Validation(format!(
            "connection.port must be between 1 and 65535, got {}",
            conn.port
        )));
    }
    if conn.database.len() > 64 {
        return Err(MigrateError::Validation(
            "connection.database exceeds 64 characters".into(),
        ));
    }

    Ok(())
}

/// Validate engine settings - only checks values that were explicitly set.
pub fn validate_engine(config: &EngineConfig) -> Result<()> {
    if let Some(0) = config.workers {
        return Err(MigrateError::Config("workers must be at least 1".into()));
    }
    if let Some(0) = config.batch_size {
        return Err(MigrateError::Config("batch_size must be at least 1".into()));
    }
    if let Some(0) = config.read_ahead_batches {
        return Err(MigrateError::Config(
            "read_ahead_batches must be at least 1".into(),
        ));
    }
    if let Some(0) = config.max_retries {
        return Err(MigrateError::Config("max_retries must be at least 1".into()));
    }
    if let Some(0) = config.export_batch_rows {
        return Err(MigrateError::Config(
            "export_batch_rows must be at least 1".into(),
        ));
    }
    if let Some(p) = config.analyzing_progress {
        if p >= 100 {
            return Err(MigrateError::Config(
                "analyzing_progress must be below 100".into(),
            ));
        }
    }

    Ok(())
}
