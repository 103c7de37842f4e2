//! Prompt construction for SQL generation and result evaluation.

use std::fmt::Write as _;

use crate::llm::ChatMessage;
use crate::models::{DBServerVersion, DatabaseMetadata, Dialect, QueryOutput, SchemaFormat};

/// Rows shown to the evaluation model.
pub const MAX_EVALUATION_ROWS: usize = 20;

const GENERATION_RULES: &str = "\
You translate questions into SQL for the database described below.

Rules:
- Write exactly one read-only SELECT statement in the dialect of the database server.
- Use only tables and columns that appear in the schema.
- Quote identifiers only when the schema spelling requires it.
- If the question can be answered without querying the database, answer it directly.

Reply with JSON only, in one of these forms:
{\"sql\": \"<the SQL statement>\"}
{\"answer\": \"<a direct answer>\"}";

const EVALUATION_RULES: &str = "\
You check whether the result of a SQL query answers a user's question.
An empty result can still be a correct answer.

Reply with JSON only:
{\"relevant\": true or false, \"reason\": \"<why the result does or does not answer the question>\"}";

/// Header line plus the rendered schema, as shown to the generation model.
pub fn schema_description(
    dialect: Dialect,
    version: Option<&DBServerVersion>,
    metadata: &DatabaseMetadata,
    format: SchemaFormat,
) -> String {
    let version = version.map(|v| v.to_string()).unwrap_or_default();
    format!(
        "Database server info: {} {}\n{}",
        dialect.display_name(),
        version,
        metadata.render(format)
    )
}

/// The attempt that failed, fed back as correction context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviousAttempt {
    pub sql: String,
    pub error: String,
}

pub fn generation_messages(
    query: &str,
    schema: &str,
    evidence: &str,
    previous: Option<&PreviousAttempt>,
) -> Vec<ChatMessage> {
    let mut system = String::from(GENERATION_RULES);
    let _ = write!(system, "\n\n{}", schema);

    let mut user = String::new();
    if !evidence.trim().is_empty() {
        let _ = writeln!(user, "Hint: {}\n", evidence.trim());
    }
    let _ = write!(user, "Question: {}", query.trim());

    if let Some(previous) = previous {
        user.push_str("\n\nYour previous attempt failed.");
        if !previous.sql.is_empty() {
            let _ = write!(user, "\nPrevious SQL:\n{}", previous.sql);
        }
        let _ = write!(user, "\nError:\n{}\nFix the problem and reply again.", previous.error);
    }

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn evaluation_messages(query: &str, sql: &str, result: &QueryOutput) -> Vec<ChatMessage> {
    let mut user = format!("Question: {}\n\nSQL:\n{}\n\nResult", query.trim(), sql);
    let shown = result.rows.len().min(MAX_EVALUATION_ROWS);
    if shown < result.rows.len() {
        let _ = write!(user, " (first {} of {} rows)", shown, result.rows.len());
    }
    user.push_str(":\n");
    let _ = writeln!(user, "{}", result.columns.join(" | "));
    for row in result.rows.iter().take(MAX_EVALUATION_ROWS) {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| match cell {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        let _ = writeln!(user, "{}", cells.join(" | "));
    }
    if result.rows.is_empty() {
        user.push_str("(no rows)\n");
    }

    vec![ChatMessage::system(EVALUATION_RULES), ChatMessage::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DBTable, TableColumn};
    use serde_json::json;

    #[test]
    fn test_schema_description_header() {
        let metadata = DatabaseMetadata::new("shop")
            .with_table(DBTable::new("orders").with_column(TableColumn::new("id", "INT")));
        let text = schema_description(
            Dialect::MySql,
            Some(&DBServerVersion::new(8, 0, Some(36))),
            &metadata,
            SchemaFormat::Markdown,
        );
        assert!(text.starts_with("Database server info: MySQL 8.0.36\n"));
        assert!(text.contains("orders"));
    }

    #[test]
    fn test_retry_context_included() {
        let previous = PreviousAttempt {
            sql: "SELECT nme FROM users".to_string(),
            error: "no such column: nme".to_string(),
        };
        let messages = generation_messages("list users", "schema", "", Some(&previous));
        assert_eq!(messages.len(), 2);
        let user = &messages[1].content;
        assert!(user.contains("SELECT nme FROM users"));
        assert!(user.contains("no such column: nme"));
        assert!(!user.contains("Hint:"));
    }

    #[test]
    fn test_evaluation_rows_capped() {
        let rows = (0..30).map(|i| vec![json!(i)]).collect();
        let result = QueryOutput::new(vec!["n".to_string()], rows);
        let messages = evaluation_messages("numbers", "SELECT n FROM t", &result);
        let user = &messages[1].content;
        assert!(user.contains("first 20 of 30 rows"));
        assert!(user.contains("\n19\n"));
        assert!(!user.contains("\n20\n"));
    }
}
