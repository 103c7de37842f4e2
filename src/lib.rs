//! NL2SQL gateway library.
//!
//! Schema introspection for SQL data sources, SQL validation and rewriting,
//! and a language-model driven loop that turns questions into executed SQL.

pub mod agent;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod sql;

pub use agent::{Agent, AgentOptions, AgentOutput};
pub use config::Config;
pub use db::{AnySource, DataSource, connect};
pub use error::{DataSourceError, SqlError, SqlErrorKind};
