//! Target database operations.
//!
//! The engine writes through the [`TargetWriter`](crate::core::TargetWriter)
//! trait; MySQL is the only production implementation.

mod mysql;

pub use mysql::{classify, MysqlConnector, MysqlWriter};
