//! Adapters for sources reached through sqlx: MySQL/MariaDB, PostgreSQL and
//! SQLite files.

use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use tracing::warn;

use crate::db::executor::{QueryExecutor, non_empty_sql};
use crate::db::source::DataSource;
use crate::error::SqlError;
use crate::models::{Dialect, NetworkConfig, PostgresConfig, QueryOutput};

/// MySQL and MariaDB.
pub struct MySqlSource {
    config: NetworkConfig,
    options: MySqlConnectOptions,
    executor: QueryExecutor,
}

impl MySqlSource {
    pub fn new(config: NetworkConfig, executor: QueryExecutor) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port_or(Dialect::MySql))
            .username(&config.user)
            .password(&config.password)
            .database(&config.db)
            .charset("utf8mb4");
        Self {
            config,
            options,
            executor,
        }
    }
}

#[async_trait]
impl DataSource for MySqlSource {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn database_name(&self) -> String {
        self.config.db.clone()
    }

    async fn execute_raw_sql(&self, sql: &str) -> Result<QueryOutput, SqlError> {
        let sql = non_empty_sql(sql)?;
        self.executor.mysql(&self.options, sql).await
    }
}

/// PostgreSQL, scoped to one schema through `search_path`.
pub struct PostgresSource {
    config: PostgresConfig,
    options: PgConnectOptions,
    executor: QueryExecutor,
}

impl PostgresSource {
    pub fn new(config: PostgresConfig, executor: QueryExecutor) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.conn.host)
            .port(config.conn.port_or(Dialect::Postgres))
            .username(&config.conn.user)
            .password(&config.conn.password)
            .database(&config.conn.db)
            .options([("search_path", config.schema.as_str())]);
        Self {
            config,
            options,
            executor,
        }
    }

    pub fn schema(&self) -> &str {
        &self.config.schema
    }
}

#[async_trait]
impl DataSource for PostgresSource {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn database_name(&self) -> String {
        self.config.conn.db.clone()
    }

    async fn execute_raw_sql(&self, sql: &str) -> Result<QueryOutput, SqlError> {
        let sql = non_empty_sql(sql)?;
        self.executor.postgres(&self.options, sql).await
    }
}

/// A SQLite database file, opened read-only.
pub struct SqliteSource {
    path: PathBuf,
    options: SqliteConnectOptions,
    executor: QueryExecutor,
}

impl SqliteSource {
    pub fn new(path: PathBuf, executor: QueryExecutor) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(true)
            .create_if_missing(false);
        Self {
            path,
            options,
            executor,
        }
    }
}

#[async_trait]
impl DataSource for SqliteSource {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn database_name(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "main".to_string())
    }

    async fn conn_test(&self) -> bool {
        if !self.path.is_file() {
            warn!(path = %self.path.display(), "SQLite database file does not exist");
            return false;
        }
        self.execute_raw_sql("SELECT 1").await.is_ok()
    }

    async fn execute_raw_sql(&self, sql: &str) -> Result<QueryOutput, SqlError> {
        let sql = non_empty_sql(sql)?;
        self.executor.sqlite(&self.options, sql).await
    }
}
