//! Data models for the NL2SQL gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod metadata;
pub mod query;
pub mod render;
pub mod source;

pub use metadata::{
    DBServerVersion, DBTable, DatabaseMetadata, SchemaFormat, TableColumn, TableForeignKey,
};
pub use query::{DEFAULT_MAX_EXAMPLE_LEN, DEFAULT_VALUE_NUM, QueryOutput};
pub use source::{DataSourceConfig, Dialect, DuckDbStore, NetworkConfig, PostgresConfig, S3Config};
