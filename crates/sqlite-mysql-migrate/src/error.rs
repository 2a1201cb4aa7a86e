//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Malformed connection settings or options, rejected before a job exists.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Engine configuration error (invalid YAML, zero workers, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target unreachable or credentials rejected.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Source file missing, corrupt, or not a SQLite database.
    #[error("Source unreadable: {0}")]
    SourceUnreadable(String),

    /// Table cannot be represented in the target.
    #[error("Table {table} cannot be migrated: {message}")]
    SchemaIncompatibility { table: String, message: String },

    /// A single value could not be converted to its target column type.
    #[error("Cannot coerce value for column {column}: {message}")]
    RowCoercion { column: String, message: String },

    /// Connection drop, timeout, deadlock or lock wait on the target.
    #[error("Transient target error: {0}")]
    TransientTarget(String),

    /// Target server rejected a statement.
    #[error("Target database error: {0}")]
    Target(String),

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Unknown job id.
    #[error("Migration job not found: {0}")]
    JobNotFound(String),

    /// Migration was cancelled by the caller.
    #[error("Migration cancelled")]
    Cancelled,

    /// Source database error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a SchemaIncompatibility error
    pub fn incompatible(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::SchemaIncompatibility {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a RowCoercion error
    pub fn coercion(column: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::RowCoercion {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, MigrateError::TransientTarget(_))
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Validation(_) | MigrateError::Config(_) => 2,
            MigrateError::Connectivity(_) => 3,
            MigrateError::SourceUnreadable(_) | MigrateError::Sqlite(_) => 4,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
