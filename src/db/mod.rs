//! Data source layer.
//!
//! This module provides database access functionality:
//! - The [`DataSource`] contract and the per-dialect adapters behind it
//! - Raw SQL execution over short-lived connections
//! - Schema introspection and value sampling
//! - Type mappings
//! - Dispatch macros for reducing code duplication

pub mod adapters;
pub mod duckdb;
pub mod examples;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod schema;
pub mod source;
pub mod types;

pub use adapters::{MySqlSource, PostgresSource, SqliteSource};
pub use duckdb::{DuckDbSource, ObjectStore};
pub use executor::QueryExecutor;
pub use source::{AnySource, DataSource, connect};
