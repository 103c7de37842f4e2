//! DuckDB over files: a local directory or an S3-compatible bucket.
//!
//! Every supported file becomes a view named after its file stem. Views are
//! registered on first use and the connection is kept for the lifetime of the
//! adapter, so later calls see the same catalog.
//!
//! The duckdb crate is synchronous; all work runs on the blocking pool behind
//! a mutex that owns the connection.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime};
use duckdb::Connection;
use duckdb::types::{TimeUnit, Value};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::db::executor::non_empty_sql;
use crate::db::source::DataSource;
use crate::db::types::decode_binary_value;
use crate::error::{DataSourceError, DataSourceResult, SqlError};
use crate::models::{Dialect, DuckDbStore, QueryOutput, S3Config};

const SECRET_NAME: &str = "nl2sql_s3";

/// File formats DuckDB can expose as a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Tsv,
    Json,
    JsonLines,
    Parquet,
    Xlsx,
    Xls,
}

impl FileFormat {
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "json" => Some(Self::Json),
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            "parquet" => Some(Self::Parquet),
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            _ => None,
        }
    }

    /// Table function call reading `location`.
    fn reader(&self, location: &str) -> String {
        let location = quote_literal(location);
        match self {
            Self::Csv => format!("read_csv_auto({location})"),
            Self::Tsv => format!("read_csv_auto({location}, delim = '\\t')"),
            Self::Json => format!("read_json_auto({location})"),
            Self::JsonLines => {
                format!("read_json_auto({location}, format = 'newline_delimited')")
            }
            Self::Parquet => format!("read_parquet({location})"),
            Self::Xlsx => format!("read_xlsx({location})"),
            // The excel extension reads only OOXML; legacy workbooks go through GDAL
            Self::Xls => format!("st_read({location})"),
        }
    }

    /// Extension that must be loaded before [`FileFormat::reader`] works.
    fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Xlsx => Some("excel"),
            Self::Xls => Some("spatial"),
            _ => None,
        }
    }
}

/// Where the files live. Implementations prepare the connection (extensions,
/// credentials) and list locations DuckDB can read directly.
pub trait ObjectStore: Send + Sync {
    fn prepare(&self, conn: &Connection) -> Result<(), SqlError>;
    fn list(&self, conn: &Connection) -> Result<Vec<String>, SqlError>;
    /// Name used for the metadata of this store.
    fn name(&self) -> String;
}

pub struct LocalDir {
    dir: PathBuf,
}

impl LocalDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ObjectStore for LocalDir {
    fn prepare(&self, _conn: &Connection) -> Result<(), SqlError> {
        Ok(())
    }

    fn list(&self, _conn: &Connection) -> Result<Vec<String>, SqlError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            SqlError::db(format!(
                "Cannot read directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        let mut files: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .map(|path| path.to_string_lossy().into_owned())
            .collect();
        files.sort();
        Ok(files)
    }

    fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string())
    }
}

pub struct S3Bucket {
    config: S3Config,
}

impl S3Bucket {
    pub fn new(config: S3Config) -> Self {
        Self { config }
    }

    fn secret_sql(&self) -> String {
        format!(
            "CREATE OR REPLACE SECRET {SECRET_NAME} (TYPE S3, KEY_ID {}, SECRET {}, REGION {}, \
             ENDPOINT {}, USE_SSL {}, URL_STYLE 'path')",
            quote_literal(&self.config.access_key),
            quote_literal(&self.config.secret_key),
            quote_literal(&self.config.region),
            quote_literal(&self.config.endpoint()),
            self.config.use_ssl,
        )
    }
}

impl ObjectStore for S3Bucket {
    fn prepare(&self, conn: &Connection) -> Result<(), SqlError> {
        conn.execute_batch("INSTALL httpfs; LOAD httpfs;")
            .map_err(|e| SqlError::db(format!("Failed to load httpfs: {}", e)))?;
        conn.execute_batch(&self.secret_sql())
            .map_err(|e| SqlError::db(format!("Failed to register S3 credentials: {}", e)))
    }

    fn list(&self, conn: &Connection) -> Result<Vec<String>, SqlError> {
        let pattern = format!("{}**", self.config.root_url());
        let sql = format!(
            "SELECT file FROM glob({}) ORDER BY file",
            quote_literal(&pattern)
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| SqlError::db(format!("Failed to list bucket: {}", e)))?;
        let files = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| SqlError::db(format!("Failed to list bucket: {}", e)))?;
        Ok(files)
    }

    fn name(&self) -> String {
        self.config.bucket.clone()
    }
}

struct DuckState {
    conn: Connection,
    loaded: bool,
}

pub struct DuckDbSource {
    store: Arc<dyn ObjectStore>,
    state: Arc<Mutex<DuckState>>,
}

impl DuckDbSource {
    pub fn new(store: DuckDbStore) -> DataSourceResult<Self> {
        let store: Arc<dyn ObjectStore> = match store {
            DuckDbStore::Local { dir } => Arc::new(LocalDir::new(dir)),
            DuckDbStore::S3(config) => Arc::new(S3Bucket::new(config)),
        };
        Self::with_store(store)
    }

    pub fn with_store(store: Arc<dyn ObjectStore>) -> DataSourceResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            DataSourceError::connection(
                format!("Failed to open DuckDB: {}", e),
                "Check that the process can allocate an in-memory database",
            )
        })?;
        Ok(Self {
            store,
            state: Arc::new(Mutex::new(DuckState {
                conn,
                loaded: false,
            })),
        })
    }

    /// Register a view per supported file. Runs once; a failed listing is
    /// retried on the next call.
    fn ensure_loaded(state: &mut DuckState, store: &dyn ObjectStore) -> Result<(), SqlError> {
        if state.loaded {
            return Ok(());
        }

        store.prepare(&state.conn)?;
        let files = store.list(&state.conn)?;
        let mut taken = HashSet::new();
        let mut loaded_extensions = HashSet::new();
        let mut registered = 0usize;

        for location in files {
            let Some(format) = FileFormat::from_path(&location) else {
                continue;
            };
            if let Some(ext) = format.extension() {
                if loaded_extensions.insert(ext) {
                    if let Err(e) = state
                        .conn
                        .execute_batch(&format!("INSTALL {ext}; LOAD {ext};"))
                    {
                        warn!(extension = ext, error = %e, "Failed to load DuckDB extension");
                    }
                }
            }

            let view = unique_view_name(&location, &mut taken);
            let sql = format!(
                "CREATE OR REPLACE VIEW {} AS SELECT * FROM {}",
                Dialect::DuckDb.quote_identifier(&view),
                format.reader(&location)
            );
            match state.conn.execute_batch(&sql) {
                Ok(()) => {
                    debug!(view = %view, location = %location, "Registered view");
                    registered += 1;
                }
                Err(e) => warn!(location = %location, error = %e, "Skipping unreadable file"),
            }
        }

        info!(views = registered, "DuckDB views registered");
        state.loaded = true;
        Ok(())
    }
}

#[async_trait]
impl DataSource for DuckDbSource {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn database_name(&self) -> String {
        self.store.name()
    }

    async fn execute_raw_sql(&self, sql: &str) -> Result<QueryOutput, SqlError> {
        let sql = non_empty_sql(sql)?.to_string();
        let state = Arc::clone(&self.state);
        let store = Arc::clone(&self.store);

        tokio::task::spawn_blocking(move || {
            let mut state = state
                .lock()
                .map_err(|_| SqlError::unknown("DuckDB connection lock poisoned"))?;
            Self::ensure_loaded(&mut state, store.as_ref())?;
            run_query(&state.conn, &sql)
        })
        .await
        .map_err(|e| SqlError::unknown(format!("DuckDB worker failed: {}", e)))?
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<QueryOutput, SqlError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let columns: Vec<String> = rows
        .as_ref()
        .map(|stmt| stmt.column_names())
        .unwrap_or_default();

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            let value: Value = row.get(idx)?;
            cells.push(value_to_json(value));
        }
        out.push(cells);
    }
    Ok(QueryOutput::new(columns, out))
}

fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::TinyInt(v) => v.into(),
        Value::SmallInt(v) => v.into(),
        Value::Int(v) => v.into(),
        Value::BigInt(v) => v.into(),
        Value::UTinyInt(v) => v.into(),
        Value::USmallInt(v) => v.into(),
        Value::UInt(v) => v.into(),
        Value::UBigInt(v) => v.into(),
        Value::HugeInt(v) => match i64::try_from(v) {
            Ok(small) => small.into(),
            Err(_) => JsonValue::String(v.to_string()),
        },
        Value::Float(v) => float_json(v as f64),
        Value::Double(v) => float_json(v),
        Value::Decimal(d) => JsonValue::String(d.to_string()),
        Value::Text(s) | Value::Enum(s) => JsonValue::String(s),
        Value::Blob(bytes) => decode_binary_value(&bytes),
        Value::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(ChronoDuration::days(days.into())))
            .map_or(JsonValue::Null, |d| JsonValue::String(d.to_string())),
        Value::Timestamp(unit, v) => DateTime::from_timestamp_micros(to_micros(unit, v))
            .map_or(JsonValue::Null, |t| JsonValue::String(t.naive_utc().to_string())),
        Value::Time64(unit, v) => {
            let micros = to_micros(unit, v);
            let secs = u32::try_from(micros.div_euclid(1_000_000)).unwrap_or_default();
            let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).unwrap_or_default();
            NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                .map_or(JsonValue::Null, |t| JsonValue::String(t.to_string()))
        }
        Value::List(items) | Value::Array(items) => {
            JsonValue::Array(items.into_iter().map(value_to_json).collect())
        }
        other => JsonValue::String(format!("{:?}", other)),
    }
}

fn to_micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

fn float_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// View name from the file stem: non-identifier characters become `_`, a
/// leading digit gets a `t_` prefix, and repeats get `_2`, `_3`, ...
pub fn unique_view_name(location: &str, taken: &mut HashSet<String>) -> String {
    let stem = location
        .rsplit(['/', '\\'])
        .next()
        .and_then(|file| Path::new(file).file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut base: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if base.is_empty() {
        base = "data".to_string();
    }
    if base.starts_with(|c: char| c.is_ascii_digit()) {
        base = format!("t_{}", base);
    }

    let mut name = base.clone();
    let mut n = 2;
    while !taken.insert(name.to_lowercase()) {
        name = format!("{}_{}", base, n);
        n += 1;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_format_detection() {
        assert_eq!(FileFormat::from_path("a/b/Sales.CSV"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_path("x.ndjson"), Some(FileFormat::JsonLines));
        assert_eq!(FileFormat::from_path("s3://b/k/t.parquet"), Some(FileFormat::Parquet));
        assert_eq!(FileFormat::from_path("book.xls"), Some(FileFormat::Xls));
        assert_eq!(FileFormat::from_path("notes.txt"), None);
        assert_eq!(FileFormat::from_path("README"), None);
    }

    #[test]
    fn test_reader_escapes_location() {
        assert_eq!(
            FileFormat::Csv.reader("/data/o'brien.csv"),
            "read_csv_auto('/data/o''brien.csv')"
        );
        assert_eq!(FileFormat::Xlsx.extension(), Some("excel"));
    }

    #[test]
    fn test_unique_view_names() {
        let mut taken = HashSet::new();
        assert_eq!(unique_view_name("/d/orders.csv", &mut taken), "orders");
        assert_eq!(unique_view_name("/e/orders.parquet", &mut taken), "orders_2");
        assert_eq!(unique_view_name("/d/Orders.json", &mut taken), "Orders_3");
        assert_eq!(unique_view_name("s3://b/2024 sales.csv", &mut taken), "t_2024_sales");
    }

    #[test]
    fn test_secret_sql_escapes_credentials() {
        let bucket = S3Bucket::new(S3Config {
            host: "minio".into(),
            port: Some(9000),
            access_key: "ak".into(),
            secret_key: "s'k".into(),
            bucket: "lake".into(),
            region: "us-east-1".into(),
            use_ssl: false,
            prefix: None,
        });
        let sql = bucket.secret_sql();
        assert!(sql.contains("SECRET 's''k'"));
        assert!(sql.contains("ENDPOINT 'minio:9000'"));
        assert!(sql.contains("USE_SSL false"));
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(value_to_json(Value::Int(7)), serde_json::json!(7));
        assert_eq!(value_to_json(Value::Null), JsonValue::Null);
        assert_eq!(
            value_to_json(Value::Date32(19_723)),
            serde_json::json!("2024-01-01")
        );
        assert_eq!(
            value_to_json(Value::Timestamp(TimeUnit::Second, 1_704_067_200)),
            serde_json::json!("2024-01-01 00:00:00")
        );
        assert_eq!(
            value_to_json(Value::List(vec![Value::Text("a".into()), Value::Null])),
            serde_json::json!(["a", null])
        );
    }
}
