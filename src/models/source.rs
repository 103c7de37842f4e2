//! Data source configuration.
//!
//! A request carries a [`DataSourceConfig`] tagged by `type`; the factory in
//! [`crate::db::connect`] turns it into a live adapter.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DataSourceError, DataSourceResult};

/// SQL dialect spoken by a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Includes MariaDB
    MySql,
    Postgres,
    Sqlite,
    DuckDb,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::DuckDb => "duckdb",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::Sqlite => "SQLite",
            Self::DuckDb => "DuckDB",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
            Self::Sqlite | Self::DuckDb => None,
        }
    }

    /// Quote an identifier, doubling any embedded quote character.
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Target type for `CAST(x AS ...)` to text.
    pub fn text_cast_type(&self) -> &'static str {
        match self {
            Self::MySql => "CHAR",
            Self::Postgres | Self::Sqlite => "TEXT",
            Self::DuckDb => "VARCHAR",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Host/port/credential block shared by networked sources.
#[derive(Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    /// Contains sensitive data - never log
    #[serde(rename = "pass", alias = "password", default)]
    pub password: String,
    pub db: String,
}

impl NetworkConfig {
    pub fn port_or(&self, dialect: Dialect) -> u16 {
        self.port.or(dialect.default_port()).unwrap_or_default()
    }

    fn validate(&self) -> DataSourceResult<()> {
        if self.host.trim().is_empty() {
            return Err(DataSourceError::invalid_config("host must not be empty"));
        }
        if self.user.trim().is_empty() {
            return Err(DataSourceError::invalid_config("user must not be empty"));
        }
        if self.db.trim().is_empty() {
            return Err(DataSourceError::invalid_config("db must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("db", &self.db)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(flatten)]
    pub conn: NetworkConfig,
    #[serde(default = "default_pg_schema")]
    pub schema: String,
}

fn default_pg_schema() -> String {
    "public".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub access_key: String,
    /// Contains sensitive data - never log
    pub secret_key: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub use_ssl: bool,
    /// Only objects under this key prefix are registered.
    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3Config {
    /// `host[:port]` as expected by an S3 endpoint setting.
    pub fn endpoint(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// `s3://bucket/prefix/` glob root.
    pub fn root_url(&self) -> String {
        let prefix = self
            .prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty());
        match prefix {
            Some(prefix) => format!("s3://{}/{}/", self.bucket, prefix),
            None => format!("s3://{}/", self.bucket),
        }
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("access_key", &self.access_key)
            .field("secret_key", &"****")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("use_ssl", &self.use_ssl)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Where DuckDB finds the files it exposes as views.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DuckDbStore {
    Local { dir: String },
    S3(S3Config),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataSourceConfig {
    Sqlite {
        path: String,
    },
    #[serde(alias = "maria", alias = "mariadb")]
    Mysql(NetworkConfig),
    #[serde(alias = "postgresql")]
    Postgres(PostgresConfig),
    Duckdb {
        store: DuckDbStore,
    },
}

impl DataSourceConfig {
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Sqlite { .. } => Dialect::Sqlite,
            Self::Mysql(_) => Dialect::MySql,
            Self::Postgres(_) => Dialect::Postgres,
            Self::Duckdb { .. } => Dialect::DuckDb,
        }
    }

    /// Check required fields before any connection attempt.
    pub fn validate(&self) -> DataSourceResult<()> {
        match self {
            Self::Sqlite { path } if path.trim().is_empty() => {
                Err(DataSourceError::invalid_config("sqlite path must not be empty"))
            }
            Self::Sqlite { .. } => Ok(()),
            Self::Mysql(conn) => conn.validate(),
            Self::Postgres(pg) => pg.conn.validate(),
            Self::Duckdb {
                store: DuckDbStore::Local { dir },
            } if dir.trim().is_empty() => Err(DataSourceError::invalid_config(
                "duckdb local dir must not be empty",
            )),
            Self::Duckdb {
                store: DuckDbStore::S3(s3),
            } if s3.bucket.trim().is_empty() || s3.host.trim().is_empty() => Err(
                DataSourceError::invalid_config("s3 host and bucket must not be empty"),
            ),
            Self::Duckdb { .. } => Ok(()),
        }
    }
}
