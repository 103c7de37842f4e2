//! Error types for the NL2SQL gateway.
//!
//! Two layers are kept apart:
//! - [`SqlError`] is the closed taxonomy reported for SQL execution. Adapters
//!   return it as a value next to the (empty) result instead of failing.
//! - [`DataSourceError`] covers genuine adapter failures (bad configuration,
//!   unreachable server, malformed introspection output, unparseable version).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of SQL failure. Only [`SqlErrorKind::SyntaxError`] is recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlErrorKind {
    #[serde(rename = "EmptySQL")]
    EmptySql,
    SyntaxError,
    NotAllowedOperation,
    #[serde(rename = "DBError")]
    DbError,
    UnknownError,
}

impl SqlErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptySql => "EmptySQL",
            Self::SyntaxError => "SyntaxError",
            Self::NotAllowedOperation => "NotAllowedOperation",
            Self::DbError => "DBError",
            Self::UnknownError => "UnknownError",
        }
    }
}

impl std::fmt::Display for SqlErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct SqlError {
    pub kind: SqlErrorKind,
    pub message: String,
    /// Vendor error code, when the driver reports a numeric one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl SqlError {
    pub fn new(kind: SqlErrorKind, message: impl Into<String>, code: Option<i64>) -> Self {
        Self {
            kind,
            message: message.into(),
            code,
        }
    }

    pub fn empty_sql() -> Self {
        Self::new(SqlErrorKind::EmptySql, "SQL statement is empty", None)
    }

    pub fn syntax(message: impl Into<String>, code: Option<i64>) -> Self {
        Self::new(SqlErrorKind::SyntaxError, message, code)
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::new(SqlErrorKind::NotAllowedOperation, message, None)
    }

    pub fn db(message: impl Into<String>) -> Self {
        Self::new(SqlErrorKind::DbError, message, None)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(SqlErrorKind::UnknownError, message, None)
    }

    /// Whether the agent may feed this error back into another generation attempt.
    pub fn is_recoverable(&self) -> bool {
        self.kind == SqlErrorKind::SyntaxError
    }
}

/// Classify sqlx errors into the SQL error taxonomy.
impl From<sqlx::Error> for SqlError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                // MySQL reports numeric codes ("1054"), Postgres SQLSTATEs ("42P01")
                let code = db_err.code().and_then(|c| c.parse::<i64>().ok());
                SqlError::syntax(db_err.message(), code)
            }
            sqlx::Error::Configuration(msg) => SqlError::db(format!("Configuration error: {}", msg)),
            sqlx::Error::Io(io_err) => SqlError::db(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => SqlError::db(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => SqlError::db(format!("Protocol error: {}", msg)),
            sqlx::Error::PoolTimedOut => SqlError::db("Timed out acquiring a connection"),
            sqlx::Error::PoolClosed => SqlError::db("Connection is closed"),
            sqlx::Error::WorkerCrashed => SqlError::db("Database worker crashed"),
            sqlx::Error::ColumnNotFound(col) => {
                SqlError::syntax(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                SqlError::unknown(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => SqlError::unknown(format!("Decode error: {}", source)),
            other => SqlError::unknown(format!("Unknown database error: {}", other)),
        }
    }
}

impl From<duckdb::Error> for SqlError {
    fn from(err: duckdb::Error) -> Self {
        SqlError::syntax(err.to_string(), None)
    }
}

#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("Invalid data source configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Metadata introspection failed: {message}")]
    Introspection { message: String },

    #[error("Unrecognized server version: {version}")]
    Version { version: String },

    #[error("Query failed: {0}")]
    Sql(#[from] SqlError),
}

impl DataSourceError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn introspection(message: impl Into<String>) -> Self {
        Self::Introspection {
            message: message.into(),
        }
    }

    pub fn version(version: impl Into<String>) -> Self {
        Self::Version {
            version: version.into(),
        }
    }

    /// Nearest SQL error kind, used when the failure has to travel as a [`SqlError`].
    pub fn kind(&self) -> SqlErrorKind {
        match self {
            Self::InvalidConfig { .. } | Self::Connection { .. } | Self::Introspection { .. } => {
                SqlErrorKind::DbError
            }
            Self::Version { .. } => SqlErrorKind::UnknownError,
            Self::Sql(e) => e.kind,
        }
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    pub fn into_sql_error(self) -> SqlError {
        match self {
            Self::Sql(e) => e,
            other => SqlError::new(other.kind(), other.to_string(), None),
        }
    }
}

/// Result type alias for data source operations.
pub type DataSourceResult<T> = Result<T, DataSourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_display() {
        let err = SqlError::syntax("near \"FORM\": syntax error", Some(1));
        assert_eq!(err.to_string(), "SyntaxError: near \"FORM\": syntax error");
    }

    #[test]
    fn test_only_syntax_errors_are_recoverable() {
        assert!(SqlError::syntax("bad", None).is_recoverable());
        assert!(!SqlError::db("refused").is_recoverable());
        assert!(!SqlError::empty_sql().is_recoverable());
        assert!(!SqlError::unknown("?").is_recoverable());
        assert!(!SqlError::not_allowed("DROP").is_recoverable());
    }

    #[test]
    fn test_kind_serializes_with_wire_names() {
        assert_eq!(
            serde_json::to_string(&SqlErrorKind::EmptySql).unwrap(),
            "\"EmptySQL\""
        );
        assert_eq!(
            serde_json::to_string(&SqlErrorKind::DbError).unwrap(),
            "\"DBError\""
        );
    }

    #[test]
    fn test_data_source_error_kind() {
        assert_eq!(
            DataSourceError::connection("refused", "check host").kind(),
            SqlErrorKind::DbError
        );
        assert_eq!(
            DataSourceError::version("garbage").kind(),
            SqlErrorKind::UnknownError
        );
        assert_eq!(
            DataSourceError::from(SqlError::syntax("x", None)).kind(),
            SqlErrorKind::SyntaxError
        );
    }

    #[test]
    fn test_connection_error_suggestion() {
        let err = DataSourceError::connection("refused", "Check that the server is running");
        assert_eq!(err.suggestion(), Some("Check that the server is running"));
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_into_sql_error_keeps_wrapped_error() {
        let inner = SqlError::syntax("no such table: t", None);
        let err = DataSourceError::from(inner.clone());
        assert_eq!(err.into_sql_error(), inner);
    }

    #[test]
    fn test_io_error_maps_to_db_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = SqlError::from(sqlx::Error::Io(io));
        assert_eq!(err.kind, SqlErrorKind::DbError);
    }
}
