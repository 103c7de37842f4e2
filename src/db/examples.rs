//! Value sampling for prompt enrichment.
//!
//! A single `UNION ALL` statement collects up to `value_num` distinct values
//! for every column, each aggregated into a JSON array by the dialect's
//! aggregate. Samples are truncated for prompt use, and textual columns whose
//! samples read like free text are flagged for value indexing.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::db::source::DataSource;
use crate::db::types::{TypeCategory, categorize_type};
use crate::error::{DataSourceError, DataSourceResult};
use crate::models::{DBTable, DatabaseMetadata, Dialect};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
        .expect("invalid fixed email pattern")
});

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%Y%m%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M:%S%.f", "%H:%M"];

/// Fill `examples` and `value_index` on every column of `metadata`.
pub async fn attach_examples<D: DataSource + ?Sized>(
    source: &D,
    mut metadata: DatabaseMetadata,
    value_num: usize,
    max_len: usize,
) -> DataSourceResult<DatabaseMetadata> {
    if value_num == 0 {
        return Ok(metadata);
    }

    let dialect = source.dialect();
    let agg = source.json_array_agg_func();
    let mut targets: Vec<(usize, String)> = Vec::new();
    let mut selects = Vec::new();

    for (table_idx, table) in metadata.tables.iter().enumerate() {
        let table_ref = table_reference(dialect, table);
        for column in table.columns.values() {
            if categorize_type(&column.data_type, dialect) == TypeCategory::Binary {
                continue;
            }
            selects.push(sample_select(
                targets.len(),
                dialect,
                agg,
                &table_ref,
                &column.name,
                value_num,
            ));
            targets.push((table_idx, column.name.clone()));
        }
    }

    if selects.is_empty() {
        return Ok(metadata);
    }

    debug!(columns = targets.len(), "Sampling column values");
    let sql = selects.join("\nUNION ALL\n");
    let output = source.execute_raw_sql(&sql).await.map_err(|e| {
        DataSourceError::connection(
            format!("Failed to sample column values: {}", e),
            "Check that the data source is reachable and its tables are readable",
        )
    })?;

    for row in &output.rows {
        let Some(target) = row.first().and_then(sample_index) else {
            continue;
        };
        let Some((table_idx, column_name)) = targets.get(target) else {
            continue;
        };
        let values = parse_sample(row.get(1));
        let Some(column) = metadata.tables[*table_idx].columns.get_mut(column_name) else {
            continue;
        };

        column.examples = values
            .iter()
            .take(value_num)
            .map(|v| truncate_example(v, max_len))
            .collect();
        column.value_index = match values.first() {
            Some(first) if !first.trim().is_empty() => {
                source.is_string_type(&column.data_type) && !looks_structured(first)
            }
            _ => false,
        };
    }

    Ok(metadata)
}

fn table_reference(dialect: Dialect, table: &DBTable) -> String {
    match &table.schema {
        // SQLite and DuckDB resolve unqualified names in their default schema
        Some(schema) if matches!(dialect, Dialect::MySql | Dialect::Postgres) => format!(
            "{}.{}",
            dialect.quote_identifier(schema),
            dialect.quote_identifier(&table.name)
        ),
        _ => dialect.quote_identifier(&table.name),
    }
}

fn sample_select(
    target: usize,
    dialect: Dialect,
    agg: &str,
    table_ref: &str,
    column: &str,
    value_num: usize,
) -> String {
    let col = dialect.quote_identifier(column);
    let text = dialect.text_cast_type();
    format!(
        "SELECT {target} AS target, CAST({agg}(v) AS {text}) AS examples FROM \
         (SELECT DISTINCT CAST({col} AS {text}) AS v FROM {table_ref} \
         WHERE {col} IS NOT NULL LIMIT {value_num}) AS sample_{target}"
    )
}

fn sample_index(cell: &JsonValue) -> Option<usize> {
    match cell {
        JsonValue::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_sample(cell: Option<&JsonValue>) -> Vec<String> {
    let array = match cell {
        Some(JsonValue::String(text)) => match serde_json::from_str::<JsonValue>(text) {
            Ok(JsonValue::Array(values)) => values,
            _ => return Vec::new(),
        },
        Some(JsonValue::Array(values)) => values.clone(),
        _ => return Vec::new(),
    };
    array
        .into_iter()
        .filter_map(|value| match value {
            JsonValue::Null => None,
            JsonValue::String(s) => Some(s),
            other => Some(other.to_string()),
        })
        .collect()
}

const ELLIPSIS: &str = "...";

/// Cut `value` to at most `max_len` characters, the trailing `...` included,
/// preferring to break at a whitespace inside the limit. Limits too small to
/// hold the ellipsis get a plain cut.
pub fn truncate_example(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        return value.to_string();
    }
    if max_len <= ELLIPSIS.len() {
        return value.chars().take(max_len).collect();
    }

    let mut chars = value.chars();
    let head: String = chars.by_ref().take(max_len - ELLIPSIS.len()).collect();
    let cut = if chars.next().is_some_and(char::is_whitespace) {
        head.trim_end()
    } else {
        match head.rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => head[..pos].trim_end(),
            _ => head.as_str(),
        }
    };
    format!("{}{}", cut, ELLIPSIS)
}

/// Whether a sample is a machine format (UUID, number, date/time, email)
/// rather than free text.
pub fn looks_structured(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    if uuid::Uuid::parse_str(value).is_ok() {
        return true;
    }
    if value.parse::<i64>().is_ok() || value.parse::<f64>().is_ok_and(f64::is_finite) {
        return true;
    }
    if looks_temporal(value) {
        return true;
    }
    EMAIL_PATTERN.is_match(value)
}

fn looks_temporal(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || DATE_FORMATS
            .iter()
            .any(|f| NaiveDate::parse_from_str(value, f).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(value, f).is_ok())
        || TIME_FORMATS
            .iter()
            .any(|f| NaiveTime::parse_from_str(value, f).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_example_at_word_boundary() {
        assert_eq!(truncate_example("short", 40), "short");
        assert_eq!(
            truncate_example("the quick brown fox jumps", 12),
            "the quick..."
        );
        assert_eq!(
            truncate_example("the quick brown fox jumps", 14),
            "the quick..."
        );
        // No whitespace inside the limit: hard cut
        assert_eq!(truncate_example("abcdefghij", 7), "abcd...");
    }

    #[test]
    fn test_truncate_example_never_exceeds_limit() {
        let text = "lorem ipsum dolor sit amet, consectetur adipiscing elit";
        for max_len in 0..text.len() {
            assert!(truncate_example(text, max_len).chars().count() <= max_len);
        }
        assert_eq!(truncate_example("abcdef", 3), "abc");
        assert_eq!(truncate_example("abcdef", 0), "");
    }

    #[test]
    fn test_truncate_example_counts_characters() {
        assert_eq!(truncate_example("数据库查询", 5), "数据库查询");
        assert_eq!(truncate_example("数据库查询语句", 6), "数据库...");
    }

    #[test]
    fn test_looks_structured() {
        for structured in [
            "550e8400-e29b-41d4-a716-446655440000",
            "42",
            "-3.75",
            "2024-03-01",
            "2024-03-01 12:30:00",
            "2024-03-01T12:30:00Z",
            "12:30:00",
            "alice@example.com",
        ] {
            assert!(looks_structured(structured), "{structured}");
        }
        for free_text in ["Blue running shoes", "north-east region", "NaN-free", ""] {
            assert!(!looks_structured(free_text), "{free_text}");
        }
    }

    #[test]
    fn test_parse_sample() {
        assert_eq!(
            parse_sample(Some(&json!("[\"a\", 2, null]"))),
            vec!["a".to_string(), "2".to_string()]
        );
        assert!(parse_sample(Some(&JsonValue::Null)).is_empty());
        assert!(parse_sample(Some(&json!("not json"))).is_empty());
    }

    #[test]
    fn test_sample_select_quotes_identifiers() {
        let sql = sample_select(3, Dialect::MySql, "JSON_ARRAYAGG", "`shop`.`orders`", "note", 5);
        assert!(sql.starts_with("SELECT 3 AS target, CAST(JSON_ARRAYAGG(v) AS CHAR)"));
        assert!(sql.contains("CAST(`note` AS CHAR)"));
        assert!(sql.contains("LIMIT 5"));
    }
}
