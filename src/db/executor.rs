//! Raw SQL execution over short-lived sqlx connections.
//!
//! Every call opens a dedicated connection, runs one statement and closes the
//! connection again. Sources are configured per request, so there is nothing
//! worth pooling.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL/MariaDB over the text protocol
//! - `postgres`: PostgreSQL over the simple query protocol
//! - `sqlite`: SQLite opened read-only
//!
//! Each submodule provides identical functionality adapted to the database's type system.

use std::time::Duration;

use sqlx::Connection;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::db::types::RowToJson;
use crate::error::SqlError;
use crate::models::QueryOutput;

/// Default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default time allowed for a single statement.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;

/// Executes raw SQL with connect and statement time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryExecutor {
    connect_timeout: Duration,
    query_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(connect_timeout: Duration, query_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            query_timeout,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub async fn mysql(
        &self,
        options: &sqlx::mysql::MySqlConnectOptions,
        sql: &str,
    ) -> Result<QueryOutput, SqlError> {
        debug!(sql = %sql, "Executing MySQL statement");
        let mut conn = mysql::connect(options, self.connect_timeout).await?;
        let result = mysql::run(&mut conn, sql, self.query_timeout).await;
        close(conn).await;
        result
    }

    pub async fn postgres(
        &self,
        options: &sqlx::postgres::PgConnectOptions,
        sql: &str,
    ) -> Result<QueryOutput, SqlError> {
        debug!(sql = %sql, "Executing PostgreSQL statement");
        let mut conn = postgres::connect(options, self.connect_timeout).await?;
        let result = postgres::run(&mut conn, sql, self.query_timeout).await;
        close(conn).await;
        result
    }

    pub async fn sqlite(
        &self,
        options: &sqlx::sqlite::SqliteConnectOptions,
        sql: &str,
    ) -> Result<QueryOutput, SqlError> {
        debug!(sql = %sql, "Executing SQLite statement");
        let mut conn = sqlite::connect(options, self.connect_timeout).await?;
        let result = sqlite::run(&mut conn, sql, self.query_timeout).await;
        close(conn).await;
        result
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        )
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

/// Reject blank statements before any connection is opened.
pub fn non_empty_sql(sql: &str) -> Result<&str, SqlError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == ';' || c.is_whitespace()) {
        return Err(SqlError::empty_sql());
    }
    Ok(trimmed)
}

fn process_rows<R: RowToJson>(rows: Vec<R>, described: Vec<String>) -> QueryOutput {
    let columns = match rows.first() {
        Some(first) => first.column_names(),
        None => described,
    };
    let rows = rows.iter().map(RowToJson::to_json_row).collect();
    QueryOutput::new(columns, rows)
}

async fn close<C: Connection>(conn: C) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "Failed to close connection cleanly");
    }
}

fn connect_error(err: sqlx::Error) -> SqlError {
    warn!(error = %err, "Failed to connect to data source");
    SqlError::db(format!("Failed to connect: {}", err))
}

fn connect_timeout_error(limit: Duration) -> SqlError {
    SqlError::db(format!(
        "Connection timed out after {} seconds",
        limit.as_secs()
    ))
}

fn query_timeout_error(limit: Duration) -> SqlError {
    SqlError::db(format!(
        "Statement timed out after {} seconds",
        limit.as_secs()
    ))
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
    use sqlx::{Column, Executor};

    pub async fn connect(
        options: &MySqlConnectOptions,
        limit: Duration,
    ) -> Result<MySqlConnection, SqlError> {
        match timeout(limit, MySqlConnection::connect_with(options)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(connect_error(e)),
            Err(_) => Err(connect_timeout_error(limit)),
        }
    }

    pub async fn run(
        conn: &mut MySqlConnection,
        sql: &str,
        limit: Duration,
    ) -> Result<QueryOutput, SqlError> {
        // No bind arguments: the statement goes over the text protocol, which
        // also accepts statements that cannot be prepared
        let rows = match timeout(limit, (&mut *conn).fetch_all(sql)).await {
            Ok(result) => result?,
            Err(_) => return Err(query_timeout_error(limit)),
        };
        let described = if rows.is_empty() {
            describe_columns(conn, sql).await
        } else {
            Vec::new()
        };
        Ok(process_rows(rows, described))
    }

    async fn describe_columns(conn: &mut MySqlConnection, sql: &str) -> Vec<String> {
        match (&mut *conn).describe(sql).await {
            Ok(describe) => describe
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(e) => {
                debug!(error = %e, "Could not describe empty result");
                Vec::new()
            }
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::postgres::{PgConnectOptions, PgConnection};
    use sqlx::{Column, Executor};

    pub async fn connect(
        options: &PgConnectOptions,
        limit: Duration,
    ) -> Result<PgConnection, SqlError> {
        match timeout(limit, PgConnection::connect_with(options)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(connect_error(e)),
            Err(_) => Err(connect_timeout_error(limit)),
        }
    }

    pub async fn run(
        conn: &mut PgConnection,
        sql: &str,
        limit: Duration,
    ) -> Result<QueryOutput, SqlError> {
        let rows = match timeout(limit, (&mut *conn).fetch_all(sql)).await {
            Ok(result) => result?,
            Err(_) => return Err(query_timeout_error(limit)),
        };
        let described = if rows.is_empty() {
            describe_columns(conn, sql).await
        } else {
            Vec::new()
        };
        Ok(process_rows(rows, described))
    }

    async fn describe_columns(conn: &mut PgConnection, sql: &str) -> Vec<String> {
        match (&mut *conn).describe(sql).await {
            Ok(describe) => describe
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(e) => {
                debug!(error = %e, "Could not describe empty result");
                Vec::new()
            }
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
    use sqlx::{Column, Executor};

    pub async fn connect(
        options: &SqliteConnectOptions,
        limit: Duration,
    ) -> Result<SqliteConnection, SqlError> {
        match timeout(limit, SqliteConnection::connect_with(options)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(connect_error(e)),
            Err(_) => Err(connect_timeout_error(limit)),
        }
    }

    pub async fn run(
        conn: &mut SqliteConnection,
        sql: &str,
        limit: Duration,
    ) -> Result<QueryOutput, SqlError> {
        let rows = match timeout(limit, (&mut *conn).fetch_all(sql)).await {
            Ok(result) => result?,
            Err(_) => return Err(query_timeout_error(limit)),
        };
        let described = if rows.is_empty() {
            describe_columns(conn, sql).await
        } else {
            Vec::new()
        };
        Ok(process_rows(rows, described))
    }

    async fn describe_columns(conn: &mut SqliteConnection, sql: &str) -> Vec<String> {
        match (&mut *conn).describe(sql).await {
            Ok(describe) => describe
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(e) => {
                debug!(error = %e, "Could not describe empty result");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SqlErrorKind;

    #[test]
    fn test_executor_defaults() {
        let executor = QueryExecutor::default();
        assert_eq!(
            executor.connect_timeout(),
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)
        );
        assert_eq!(
            executor.query_timeout(),
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_non_empty_sql() {
        assert_eq!(non_empty_sql("  SELECT 1 ").unwrap(), "SELECT 1");
        for blank in ["", "   ", "\n\t", " ; ;"] {
            assert_eq!(non_empty_sql(blank).unwrap_err().kind, SqlErrorKind::EmptySql);
        }
    }
}
