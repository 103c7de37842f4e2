//! Schema introspection.
//!
//! Each dialect answers a single catalog query that returns the whole schema
//! as one JSON document; [`parse_metadata`] turns that document into a
//! [`DatabaseMetadata`].
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! dialect. Engines disagree on how nested JSON survives aggregation (MariaDB
//! and SQLite may hand nested documents back as strings), so nested fields are
//! decoded leniently.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{DataSourceError, DataSourceResult};
use crate::models::{
    DBServerVersion, DBTable, DatabaseMetadata, Dialect, QueryOutput, TableColumn,
    TableForeignKey,
};

/// Catalog query returning the schema as a single JSON cell.
pub fn metadata_query(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => queries::mysql::METADATA,
        Dialect::Postgres => queries::postgres::METADATA,
        Dialect::Sqlite => queries::sqlite::METADATA,
        Dialect::DuckDb => queries::duckdb::METADATA,
    }
}

/// Query returning the raw server version banner.
pub fn version_query(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => queries::mysql::VERSION,
        Dialect::Postgres => queries::postgres::VERSION,
        Dialect::Sqlite => queries::sqlite::VERSION,
        Dialect::DuckDb => queries::duckdb::VERSION,
    }
}

/// Build metadata from the single cell returned by [`metadata_query`].
///
/// No rows, or a NULL cell, means an empty database named `fallback_name`.
pub fn parse_metadata(
    output: &QueryOutput,
    fallback_name: &str,
) -> DataSourceResult<DatabaseMetadata> {
    let document = match output.scalar() {
        None | Some(JsonValue::Null) => return Ok(DatabaseMetadata::new(fallback_name)),
        Some(JsonValue::String(text)) => serde_json::from_str::<JsonValue>(text)
            .map_err(|e| DataSourceError::introspection(format!("invalid JSON document: {e}")))?,
        Some(other) => other.clone(),
    };

    let raw: RawMetadata = serde_json::from_value(document)
        .map_err(|e| DataSourceError::introspection(format!("unexpected document shape: {e}")))?;

    let mut metadata = DatabaseMetadata::new(
        raw.name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| fallback_name.to_string()),
    );
    metadata.comment = raw.comment.unwrap_or_default();

    for table in nested::<RawTable>(raw.tables)? {
        let mut converted = DBTable::new(table.name);
        converted.schema = table.schema.filter(|s| !s.is_empty());
        converted.comment = table.comment.unwrap_or_default();
        for column in nested::<TableColumn>(table.columns)? {
            converted.columns.insert(column.name.clone(), column);
        }
        converted.primary_keys = nested(table.primary_keys)?;
        converted.foreign_keys = nested::<TableForeignKey>(table.foreign_keys)?;
        metadata.tables.push(converted);
    }

    debug!(
        database = %metadata.name,
        tables = metadata.tables.len(),
        "Parsed schema metadata"
    );
    Ok(metadata)
}

/// Parse the first cell of a [`version_query`] result.
pub fn parse_version(output: &QueryOutput) -> DataSourceResult<DBServerVersion> {
    let raw = match output.scalar() {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    DBServerVersion::parse(&raw).ok_or_else(|| DataSourceError::version(raw))
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    tables: JsonValue,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    name: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    columns: JsonValue,
    #[serde(default)]
    primary_keys: JsonValue,
    #[serde(default)]
    foreign_keys: JsonValue,
}

/// Decode a nested array that may arrive as NULL, as an array, or as a
/// string holding an array.
fn nested<T: DeserializeOwned>(value: JsonValue) -> DataSourceResult<Vec<T>> {
    let result = match value {
        JsonValue::Null => return Ok(Vec::new()),
        JsonValue::String(text) if text.trim().is_empty() => return Ok(Vec::new()),
        JsonValue::String(text) => serde_json::from_str::<Option<Vec<T>>>(&text),
        other => serde_json::from_value::<Option<Vec<T>>>(other),
    };
    result
        .map(Option::unwrap_or_default)
        .map_err(|e| DataSourceError::introspection(format!("unexpected nested value: {e}")))
}

// =============================================================================
// SQL Query Templates
// =============================================================================
//
// Every query yields one row with one column holding the schema document:
// {name, comment, tables: [{name, schema, comment, columns: [...],
//  primary_keys: [...], foreign_keys: [...]}]}

mod queries {
    pub mod mysql {
        pub const VERSION: &str = "SELECT VERSION()";

        pub const METADATA: &str = r#"
            SELECT JSON_OBJECT(
                'name', DATABASE(),
                'comment', '',
                'tables', COALESCE((
                    SELECT JSON_ARRAYAGG(JSON_OBJECT(
                        'name', t.TABLE_NAME,
                        'schema', t.TABLE_SCHEMA,
                        'comment', t.TABLE_COMMENT,
                        'columns', (
                            SELECT JSON_ARRAYAGG(JSON_OBJECT(
                                'name', c.COLUMN_NAME,
                                'type', c.COLUMN_TYPE,
                                'comment', c.COLUMN_COMMENT,
                                'auto_increment', c.EXTRA LIKE '%auto_increment%',
                                'nullable', c.IS_NULLABLE = 'YES',
                                'default', c.COLUMN_DEFAULT
                            ))
                            FROM information_schema.COLUMNS c
                            WHERE c.TABLE_SCHEMA = t.TABLE_SCHEMA
                              AND c.TABLE_NAME = t.TABLE_NAME
                        ),
                        'primary_keys', (
                            SELECT JSON_ARRAYAGG(k.COLUMN_NAME)
                            FROM information_schema.KEY_COLUMN_USAGE k
                            WHERE k.TABLE_SCHEMA = t.TABLE_SCHEMA
                              AND k.TABLE_NAME = t.TABLE_NAME
                              AND k.CONSTRAINT_NAME = 'PRIMARY'
                        ),
                        'foreign_keys', (
                            SELECT JSON_ARRAYAGG(JSON_OBJECT(
                                'name', k.CONSTRAINT_NAME,
                                'column', k.COLUMN_NAME,
                                'referenced_schema', k.REFERENCED_TABLE_SCHEMA,
                                'referenced_table', k.REFERENCED_TABLE_NAME,
                                'referenced_column', k.REFERENCED_COLUMN_NAME
                            ))
                            FROM information_schema.KEY_COLUMN_USAGE k
                            WHERE k.TABLE_SCHEMA = t.TABLE_SCHEMA
                              AND k.TABLE_NAME = t.TABLE_NAME
                              AND k.REFERENCED_TABLE_NAME IS NOT NULL
                        )
                    ))
                    FROM information_schema.TABLES t
                    WHERE t.TABLE_SCHEMA = DATABASE()
                      AND t.TABLE_TYPE IN ('BASE TABLE', 'VIEW')
                ), JSON_ARRAY())
            ) AS metadata
        "#;
    }

    pub mod postgres {
        pub const VERSION: &str = "SHOW server_version";

        pub const METADATA: &str = r#"
            SELECT json_build_object(
                'name', current_database(),
                'comment', COALESCE(shobj_description(
                    (SELECT oid FROM pg_database WHERE datname = current_database()),
                    'pg_database'), ''),
                'tables', COALESCE((
                    SELECT json_agg(json_build_object(
                        'name', c.relname,
                        'schema', n.nspname,
                        'comment', COALESCE(obj_description(c.oid, 'pg_class'), ''),
                        'columns', (
                            SELECT json_agg(json_build_object(
                                'name', a.attname,
                                'type', format_type(a.atttypid, a.atttypmod),
                                'comment', COALESCE(col_description(c.oid, a.attnum), ''),
                                'auto_increment', a.attidentity <> ''
                                    OR COALESCE(pg_get_expr(d.adbin, d.adrelid) LIKE 'nextval(%', false),
                                'nullable', NOT a.attnotnull,
                                'default', pg_get_expr(d.adbin, d.adrelid)
                            ) ORDER BY a.attnum)
                            FROM pg_attribute a
                            LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
                            WHERE a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
                        ),
                        'primary_keys', (
                            SELECT json_agg(a.attname ORDER BY array_position(con.conkey, a.attnum))
                            FROM pg_constraint con
                            JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = ANY(con.conkey)
                            WHERE con.conrelid = c.oid AND con.contype = 'p'
                        ),
                        'foreign_keys', (
                            SELECT json_agg(json_build_object(
                                'name', con.conname,
                                'column', a.attname,
                                'referenced_schema', rn.nspname,
                                'referenced_table', rc.relname,
                                'referenced_column', ra.attname
                            ))
                            FROM pg_constraint con
                            CROSS JOIN LATERAL unnest(con.conkey, con.confkey) AS k(col, refcol)
                            JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.col
                            JOIN pg_class rc ON rc.oid = con.confrelid
                            JOIN pg_namespace rn ON rn.oid = rc.relnamespace
                            JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.refcol
                            WHERE con.conrelid = c.oid AND con.contype = 'f'
                        )
                    ) ORDER BY c.relname)
                    FROM pg_class c
                    JOIN pg_namespace n ON n.oid = c.relnamespace
                    WHERE n.nspname = current_schema()
                      AND c.relkind IN ('r', 'v', 'm', 'p')
                ), '[]'::json)
            )::text AS metadata
        "#;
    }

    pub mod sqlite {
        pub const VERSION: &str = "SELECT sqlite_version()";

        pub const METADATA: &str = r#"
            SELECT json_object(
                'name', 'main',
                'comment', '',
                'tables', json(COALESCE((
                    SELECT json_group_array(json(tbl)) FROM (
                        SELECT json_object(
                            'name', m.name,
                            'schema', NULL,
                            'comment', '',
                            'columns', json((
                                SELECT json_group_array(json_object(
                                    'name', p.name,
                                    'type', p.type,
                                    'comment', '',
                                    'auto_increment', p.pk = 1
                                        AND upper(p.type) = 'INTEGER'
                                        AND (SELECT count(*) FROM pragma_table_info(m.name) WHERE pk > 0) = 1,
                                    'nullable', p."notnull" = 0 AND p.pk = 0,
                                    'default', p.dflt_value
                                ))
                                FROM pragma_table_info(m.name) p
                            )),
                            'primary_keys', json((
                                SELECT json_group_array(k.name)
                                FROM (SELECT name FROM pragma_table_info(m.name) WHERE pk > 0 ORDER BY pk) k
                            )),
                            'foreign_keys', json((
                                SELECT json_group_array(json_object(
                                    'name', 'fk_' || m.name || '_' || f.id,
                                    'column', f."from",
                                    'referenced_schema', NULL,
                                    'referenced_table', f."table",
                                    'referenced_column', f."to"
                                ))
                                FROM pragma_foreign_key_list(m.name) f
                            ))
                        ) AS tbl
                        FROM sqlite_master m
                        WHERE m.type IN ('table', 'view')
                          AND m.name NOT LIKE 'sqlite_%'
                        ORDER BY m.name
                    )
                ), '[]'))
            ) AS metadata
        "#;
    }

    pub mod duckdb {
        pub const VERSION: &str = "SELECT version()";

        pub const METADATA: &str = r#"
            SELECT CAST(json_object(
                'name', current_database(),
                'comment', '',
                'tables', COALESCE((
                    SELECT json_group_array(json_object(
                        'name', t.table_name,
                        'schema', t.table_schema,
                        'comment', '',
                        'columns', (
                            SELECT json_group_array(json_object(
                                'name', c.column_name,
                                'type', c.data_type,
                                'comment', '',
                                'auto_increment', false,
                                'nullable', c.is_nullable = 'YES',
                                'default', c.column_default
                            ) ORDER BY c.ordinal_position)
                            FROM information_schema.columns c
                            WHERE c.table_schema = t.table_schema
                              AND c.table_name = t.table_name
                        ),
                        'primary_keys', json_array(),
                        'foreign_keys', json_array()
                    ) ORDER BY t.table_name)
                    FROM information_schema.tables t
                    WHERE t.table_schema = current_schema()
                ), json_array())
            ) AS VARCHAR) AS metadata
        "#;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_metadata_from_string_document() {
        let document = json!({
            "name": "shop",
            "comment": "",
            "tables": [{
                "name": "orders",
                "schema": "shop",
                "comment": "Customer orders",
                "columns": [
                    {"name": "id", "type": "int", "auto_increment": 1, "nullable": 0, "default": null},
                    {"name": "user_id", "type": "int", "nullable": 1}
                ],
                "primary_keys": ["id"],
                "foreign_keys": [{
                    "name": "fk_user", "column": "user_id", "referenced_schema": "shop",
                    "referenced_table": "users", "referenced_column": "id"
                }]
            }]
        });
        let output = QueryOutput::new(
            vec!["metadata".into()],
            vec![vec![JsonValue::String(document.to_string())]],
        );

        let metadata = parse_metadata(&output, "fallback").unwrap();
        assert_eq!(metadata.name, "shop");
        let orders = &metadata.tables[0];
        assert_eq!(orders.qualified_name(), "shop.orders");
        assert!(orders.columns["id"].auto_increment);
        assert!(!orders.columns["id"].nullable);
        assert_eq!(orders.primary_keys, vec!["id".to_string()]);
        assert_eq!(orders.foreign_keys[0].referenced_table, "users");
    }

    #[test]
    fn test_parse_metadata_with_stringified_nested_arrays() {
        let document = json!({
            "name": "main",
            "tables": [{
                "name": "t",
                "columns": "[{\"name\":\"a\",\"type\":\"TEXT\"}]",
                "primary_keys": null,
                "foreign_keys": "[]"
            }]
        });
        let output = QueryOutput::new(vec!["metadata".into()], vec![vec![document]]);

        let metadata = parse_metadata(&output, "main").unwrap();
        let table = &metadata.tables[0];
        assert_eq!(table.columns["a"].data_type, "TEXT");
        assert!(table.primary_keys.is_empty());
        assert!(table.foreign_keys.is_empty());
    }

    #[test]
    fn test_parse_metadata_empty_result() {
        let metadata = parse_metadata(&QueryOutput::default(), "warehouse").unwrap();
        assert_eq!(metadata.name, "warehouse");
        assert!(metadata.tables.is_empty());
    }

    #[test]
    fn test_parse_metadata_rejects_garbage() {
        let output = QueryOutput::new(vec!["m".into()], vec![vec![json!("not json")]]);
        assert!(matches!(
            parse_metadata(&output, "x"),
            Err(DataSourceError::Introspection { .. })
        ));
    }

    #[test]
    fn test_parse_version() {
        let output = QueryOutput::new(
            vec!["server_version".into()],
            vec![vec![json!("16.2 (Debian 16.2-1.pgdg120+2)")]],
        );
        assert_eq!(
            parse_version(&output).unwrap(),
            DBServerVersion::new(16, 2, None)
        );

        let output = QueryOutput::new(vec!["v".into()], vec![vec![json!("nightly")]]);
        assert!(matches!(
            parse_version(&output),
            Err(DataSourceError::Version { .. })
        ));
    }
}
