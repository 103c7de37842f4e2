//! Row decoding for sqlx-backed sources.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Dialect-specific decoders handle the actual value extraction
//!
//! Statements are sent without bind arguments, so MySQL answers over the text
//! protocol and PostgreSQL over the simple query protocol. Every value then
//! arrives in text format, which is what makes the unchecked string fallback
//! in the decoders sound.

use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

use crate::models::Dialect;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    DateTime,
    TimestampTz,
    Unknown,
}

impl TypeCategory {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Decimal)
    }
}

/// Strip length/precision arguments and MySQL modifiers:
/// `varchar(255)` -> `varchar`, `int(10) unsigned` -> `int`.
pub fn base_type_name(type_name: &str) -> String {
    let lower = type_name.trim().to_lowercase();
    let head = match lower.find('(') {
        Some(pos) => {
            let tail = lower[pos..].find(')').map(|end| &lower[pos + end + 1..]);
            format!("{}{}", &lower[..pos], tail.unwrap_or_default())
        }
        None => lower,
    };
    head.replace(" zerofill", "")
        .replace(" unsigned", "")
        .trim()
        .to_string()
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, dialect: Dialect) -> TypeCategory {
    let base = base_type_name(type_name);

    match base.as_str() {
        // SQLite's NUMERIC is actually a float
        "numeric" if dialect == Dialect::Sqlite => TypeCategory::Float,
        "decimal" | "numeric" | "dec" => TypeCategory::Decimal,
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2" | "int4"
        | "int8" | "serial" | "smallserial" | "bigserial" | "hugeint" | "ubigint" => {
            TypeCategory::Integer
        }
        "bool" | "boolean" => TypeCategory::Boolean,
        "float" | "double" | "real" | "float4" | "float8" | "double precision" => {
            TypeCategory::Float
        }
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" | "bytea" => {
            TypeCategory::Binary
        }
        "char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "character"
        | "character varying" | "bpchar" | "name" | "citext" | "enum" | "set" | "string"
        | "clob" | "nchar" | "nvarchar" => TypeCategory::Text,
        "date" => TypeCategory::Date,
        "time" | "time without time zone" => TypeCategory::Time,
        "datetime" | "timestamp" | "timestamp without time zone" => TypeCategory::DateTime,
        "timestamptz" | "timestamp with time zone" => TypeCategory::TimestampTz,
        // SQLite affinity rules for free-form declared types
        other if dialect == Dialect::Sqlite => {
            if other.contains("int") {
                TypeCategory::Integer
            } else if other.contains("char") || other.contains("clob") || other.contains("text") {
                TypeCategory::Text
            } else if other.contains("blob") {
                TypeCategory::Binary
            } else if other.contains("real") || other.contains("floa") || other.contains("doub") {
                TypeCategory::Float
            } else {
                TypeCategory::Unknown
            }
        }
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Decode binary data to a JSON string: UTF-8 text when valid, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn display_value<T: ToString>(v: T) -> JsonValue {
    JsonValue::String(v.to_string())
}

/// Try column `$idx` as `Option<$ty>`.
///
/// `Some(Null)` for SQL NULL, `Some(map(v))` for a value, `None` when the
/// column does not decode as `$ty` so the caller can try the next type.
macro_rules! cell {
    ($row:expr, $idx:expr, $ty:ty, $map:expr) => {
        match $row.try_get::<Option<$ty>, _>($idx) {
            Ok(Some(v)) => Some(($map)(v)),
            Ok(None) => Some(JsonValue::Null),
            Err(_) => None,
        }
    };
}

/// Text fallback shared by MySQL and PostgreSQL. Both answer unprepared
/// statements in text format, so reading the raw bytes as a string is sound
/// for any column type.
fn text_cell<R>(row: &R, idx: usize) -> JsonValue
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
{
    cell!(row, idx, String, JsonValue::String).unwrap_or_else(|| {
        row.try_get_unchecked::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, JsonValue::String)
    })
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to positional JSON cells.
pub trait RowToJson {
    fn to_json_row(&self) -> Vec<JsonValue>;
    fn column_names(&self) -> Vec<String>;
}

impl RowToJson for MySqlRow {
    fn to_json_row(&self) -> Vec<JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::MySql);
                decode_mysql(self, idx, category)
            })
            .collect()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_row(&self) -> Vec<JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::Postgres);
                decode_postgres(self, idx, category)
            })
            .collect()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_row(&self) -> Vec<JsonValue> {
        (0..self.columns().len())
            .map(|idx| decode_sqlite(self, idx))
            .collect()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }
}

// =============================================================================
// Dialect-Specific Decoders
// =============================================================================

fn decode_mysql(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
    let decoded = match category {
        TypeCategory::Decimal => cell!(row, idx, RawDecimal, |d: RawDecimal| JsonValue::String(d.0)),
        // signed and unsigned columns are incompatible with each other's Rust type
        TypeCategory::Integer => cell!(row, idx, i64, JsonValue::from)
            .or_else(|| cell!(row, idx, u64, JsonValue::from)),
        TypeCategory::Boolean => cell!(row, idx, bool, JsonValue::Bool),
        TypeCategory::Float => cell!(row, idx, f64, float_value)
            .or_else(|| cell!(row, idx, f32, |v: f32| float_value(v.into()))),
        TypeCategory::Binary => cell!(row, idx, Vec<u8>, |v: Vec<u8>| decode_binary_value(&v)),
        TypeCategory::Json => cell!(row, idx, JsonValue, |v| v),
        TypeCategory::Date => cell!(row, idx, chrono::NaiveDate, display_value),
        TypeCategory::Time => cell!(row, idx, chrono::NaiveTime, display_value),
        TypeCategory::DateTime | TypeCategory::TimestampTz => {
            cell!(row, idx, chrono::NaiveDateTime, display_value)
        }
        _ => None,
    };
    decoded.unwrap_or_else(|| text_cell(row, idx))
}

fn decode_postgres(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    let decoded = match category {
        TypeCategory::Decimal => cell!(row, idx, RawDecimal, |d: RawDecimal| JsonValue::String(d.0)),
        // Postgres integer types only decode into their exact width
        TypeCategory::Integer => cell!(row, idx, i64, JsonValue::from)
            .or_else(|| cell!(row, idx, i32, JsonValue::from))
            .or_else(|| cell!(row, idx, i16, JsonValue::from)),
        TypeCategory::Boolean => cell!(row, idx, bool, JsonValue::Bool),
        TypeCategory::Float => cell!(row, idx, f64, float_value)
            .or_else(|| cell!(row, idx, f32, |v: f32| float_value(v.into()))),
        TypeCategory::Binary => cell!(row, idx, Vec<u8>, |v: Vec<u8>| decode_binary_value(&v)),
        TypeCategory::Json => cell!(row, idx, JsonValue, |v| v),
        TypeCategory::Uuid => cell!(row, idx, uuid::Uuid, display_value),
        TypeCategory::Date => cell!(row, idx, chrono::NaiveDate, display_value),
        TypeCategory::Time => cell!(row, idx, chrono::NaiveTime, display_value),
        TypeCategory::DateTime => cell!(row, idx, chrono::NaiveDateTime, display_value),
        TypeCategory::TimestampTz => cell!(
            row,
            idx,
            chrono::DateTime<chrono::Utc>,
            |t: chrono::DateTime<chrono::Utc>| JsonValue::String(t.to_rfc3339())
        ),
        _ => None,
    };
    decoded.unwrap_or_else(|| text_cell(row, idx))
}

/// SQLite is dynamically typed: expression columns carry no declared type,
/// so the storage class of the value decides. Declared BOOLEAN and JSON
/// columns are still honored.
fn decode_sqlite(row: &SqliteRow, idx: usize) -> JsonValue {
    use sqlx::ValueRef;

    let declared = row.columns()[idx].type_info().name().to_string();
    let storage = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return JsonValue::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return JsonValue::Null,
    };

    let decoded = match categorize_type(&storage, Dialect::Sqlite) {
        TypeCategory::Integer
            if categorize_type(&declared, Dialect::Sqlite) == TypeCategory::Boolean =>
        {
            cell!(row, idx, bool, JsonValue::Bool)
        }
        TypeCategory::Integer => cell!(row, idx, i64, JsonValue::from),
        TypeCategory::Float => cell!(row, idx, f64, float_value),
        TypeCategory::Binary => cell!(row, idx, Vec<u8>, |v: Vec<u8>| decode_binary_value(&v)),
        _ => cell!(row, idx, String, |text: String| {
            if declared.to_lowercase().contains("json") {
                serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
            } else {
                JsonValue::String(text)
            }
        }),
    };
    decoded.unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT", Dialect::MySql), TypeCategory::Integer);
        assert_eq!(
            categorize_type("BIGINT", Dialect::Postgres),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("int(10) unsigned", Dialect::MySql),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("SERIAL", Dialect::Postgres),
            TypeCategory::Integer
        );
        // "point" and "interval" contain "int" but are not integers
        assert_eq!(
            categorize_type("POINT", Dialect::Postgres),
            TypeCategory::Unknown
        );
        assert_eq!(
            categorize_type("INTERVAL", Dialect::Postgres),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL(10,2)", Dialect::MySql),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", Dialect::Postgres),
            TypeCategory::Decimal
        );
        // SQLite NUMERIC is a float
        assert_eq!(
            categorize_type("numeric", Dialect::Sqlite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_text_and_temporal() {
        assert_eq!(
            categorize_type("varchar(255)", Dialect::MySql),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("character varying(64)", Dialect::Postgres),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", Dialect::Postgres),
            TypeCategory::TimestampTz
        );
        assert_eq!(
            categorize_type("DATETIME", Dialect::MySql),
            TypeCategory::DateTime
        );
    }

    #[test]
    fn test_categorize_sqlite_affinity() {
        assert_eq!(
            categorize_type("UNSIGNED BIG INT", Dialect::Sqlite),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("VARYING CHARACTER(20)", Dialect::Sqlite),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("DOUBLE PRECISION", Dialect::Sqlite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_base_type_name() {
        assert_eq!(base_type_name("VARCHAR(255)"), "varchar");
        assert_eq!(base_type_name("int(11) unsigned zerofill"), "int");
        assert_eq!(base_type_name("timestamp(3) with time zone"), "timestamp with time zone");
    }

    #[test]
    fn test_decode_binary_value() {
        assert_eq!(
            decode_binary_value(b"hello world"),
            JsonValue::String("hello world".to_string())
        );
        let bytes: &[u8] = &[0xFF, 0xFE, 0x00, 0x01];
        assert_eq!(
            decode_binary_value(bytes),
            JsonValue::String("//4AAQ==".to_string())
        );
    }
}
