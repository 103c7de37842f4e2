//! The data source contract and its dialect dispatch.
//!
//! [`DataSource`] is the seam the agent and the HTTP layer talk to.
//! [`connect`] turns a [`DataSourceConfig`] into an [`AnySource`], which
//! forwards every call to the concrete adapter for its dialect.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::db::adapters::{MySqlSource, PostgresSource, SqliteSource};
use crate::db::duckdb::DuckDbSource;
use crate::db::executor::QueryExecutor;
use crate::db::{examples, schema};
use crate::error::{DataSourceResult, SqlError};
use crate::impl_source_dispatch;
use crate::models::{DBServerVersion, DataSourceConfig, DatabaseMetadata, Dialect, QueryOutput};

#[async_trait]
pub trait DataSource: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Name reported in metadata: the configured database, or a name derived
    /// from the file location for file-backed sources.
    fn database_name(&self) -> String;

    /// Upper-cased base type names this dialect stores as text.
    fn string_types(&self) -> &'static [&'static str] {
        string_types(self.dialect())
    }

    /// Aggregate that collects a column into a JSON array.
    fn json_array_agg_func(&self) -> &'static str {
        json_array_agg_func(self.dialect())
    }

    /// Whether a declared column type (`varchar(64)`, `TEXT`, ...) is textual.
    fn is_string_type(&self, data_type: &str) -> bool {
        let base = crate::db::types::base_type_name(data_type).to_uppercase();
        self.string_types().contains(&base.as_str())
    }

    async fn conn_test(&self) -> bool {
        match self.execute_raw_sql("SELECT 1").await {
            Ok(_) => true,
            Err(e) => {
                warn!(dialect = %self.dialect(), error = %e, "Connection test failed");
                false
            }
        }
    }

    async fn get_server_version(&self) -> DataSourceResult<DBServerVersion> {
        let output = self
            .execute_raw_sql(schema::version_query(self.dialect()))
            .await?;
        schema::parse_version(&output)
    }

    async fn get_metadata(&self) -> DataSourceResult<DatabaseMetadata> {
        let name = self.database_name();
        let output = self
            .execute_raw_sql(schema::metadata_query(self.dialect()))
            .await?;
        let mut metadata = schema::parse_metadata(&output, &name)?;
        metadata.name = name;
        Ok(metadata)
    }

    /// Execute one statement. Failures come back as a classified [`SqlError`]
    /// and never as a panic.
    async fn execute_raw_sql(&self, sql: &str) -> Result<QueryOutput, SqlError>;

    async fn get_metadata_with_value_examples(
        &self,
        value_num: usize,
        max_len: usize,
    ) -> DataSourceResult<DatabaseMetadata> {
        let metadata = self.get_metadata().await?;
        examples::attach_examples(self, metadata, value_num, max_len).await
    }
}

/// Text type names per dialect, upper-cased base names without arguments.
pub fn string_types(dialect: Dialect) -> &'static [&'static str] {
    match dialect {
        Dialect::MySql => &[
            "CHAR",
            "VARCHAR",
            "TINYTEXT",
            "TEXT",
            "MEDIUMTEXT",
            "LONGTEXT",
            "ENUM",
            "SET",
        ],
        Dialect::Postgres => &[
            "TEXT",
            "VARCHAR",
            "CHAR",
            "CHARACTER",
            "CHARACTER VARYING",
            "BPCHAR",
            "NAME",
            "CITEXT",
        ],
        Dialect::Sqlite => &[
            "TEXT",
            "VARCHAR",
            "CHAR",
            "CHARACTER",
            "NCHAR",
            "NVARCHAR",
            "VARYING CHARACTER",
            "NATIVE CHARACTER",
            "CLOB",
        ],
        Dialect::DuckDb => &["VARCHAR", "TEXT", "STRING", "CHAR", "BPCHAR"],
    }
}

pub fn json_array_agg_func(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => "JSON_ARRAYAGG",
        Dialect::Postgres => "json_agg",
        Dialect::Sqlite | Dialect::DuckDb => "json_group_array",
    }
}

/// One live adapter of any dialect.
pub enum AnySource {
    MySql(MySqlSource),
    Postgres(PostgresSource),
    Sqlite(SqliteSource),
    DuckDb(DuckDbSource),
}

/// Build the adapter for `config`.
///
/// No connection is opened here; adapters connect lazily on first use.
pub fn connect(config: &DataSourceConfig, executor: QueryExecutor) -> DataSourceResult<AnySource> {
    config.validate()?;
    debug!(dialect = %config.dialect(), "Creating data source adapter");

    Ok(match config {
        DataSourceConfig::Mysql(conn) => AnySource::MySql(MySqlSource::new(conn.clone(), executor)),
        DataSourceConfig::Postgres(pg) => {
            AnySource::Postgres(PostgresSource::new(pg.clone(), executor))
        }
        DataSourceConfig::Sqlite { path } => {
            AnySource::Sqlite(SqliteSource::new(path.into(), executor))
        }
        DataSourceConfig::Duckdb { store } => AnySource::DuckDb(DuckDbSource::new(store.clone())?),
    })
}

#[async_trait]
impl DataSource for AnySource {
    fn dialect(&self) -> Dialect {
        impl_source_dispatch!(self, s => s.dialect())
    }

    fn database_name(&self) -> String {
        impl_source_dispatch!(self, s => s.database_name())
    }

    fn string_types(&self) -> &'static [&'static str] {
        impl_source_dispatch!(self, s => s.string_types())
    }

    fn json_array_agg_func(&self) -> &'static str {
        impl_source_dispatch!(self, s => s.json_array_agg_func())
    }

    async fn conn_test(&self) -> bool {
        impl_source_dispatch!(self, s => s.conn_test().await)
    }

    async fn get_server_version(&self) -> DataSourceResult<DBServerVersion> {
        impl_source_dispatch!(self, s => s.get_server_version().await)
    }

    async fn get_metadata(&self) -> DataSourceResult<DatabaseMetadata> {
        impl_source_dispatch!(self, s => s.get_metadata().await)
    }

    async fn execute_raw_sql(&self, sql: &str) -> Result<QueryOutput, SqlError> {
        impl_source_dispatch!(self, s => s.execute_raw_sql(sql).await)
    }

    async fn get_metadata_with_value_examples(
        &self,
        value_num: usize,
        max_len: usize,
    ) -> DataSourceResult<DatabaseMetadata> {
        impl_source_dispatch!(self, s => s.get_metadata_with_value_examples(value_num, max_len).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataSourceError;
    use crate::models::NetworkConfig;

    #[test]
    fn test_connect_rejects_invalid_config() {
        let config = DataSourceConfig::Mysql(NetworkConfig {
            host: String::new(),
            port: None,
            user: "root".into(),
            password: String::new(),
            db: "shop".into(),
        });
        assert!(matches!(
            connect(&config, QueryExecutor::default()),
            Err(DataSourceError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_connect_builds_matching_adapter() {
        let config = DataSourceConfig::Sqlite {
            path: "/tmp/does-not-matter.db".into(),
        };
        let source = connect(&config, QueryExecutor::default()).unwrap();
        assert!(matches!(source, AnySource::Sqlite(_)));
        assert_eq!(source.dialect(), Dialect::Sqlite);
        assert_eq!(source.json_array_agg_func(), "json_group_array");
    }

    #[test]
    fn test_string_type_detection() {
        let config = DataSourceConfig::Sqlite {
            path: "/tmp/x.db".into(),
        };
        let source = connect(&config, QueryExecutor::default()).unwrap();
        assert!(source.is_string_type("varchar(64)"));
        assert!(source.is_string_type("TEXT"));
        assert!(!source.is_string_type("INTEGER"));
    }
}
