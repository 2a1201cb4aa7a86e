//! Core abstractions shared by the migration components.
//!
//! - [`value`]: SQL value representation moved from source to target
//! - [`traits`]: the target writer, connector and source store seams

pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use traits::{SourceStore, TargetConnector, TargetWriter};
pub use value::{Batch, Row, SqlValue};
