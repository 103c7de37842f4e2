//! Rewritten SQL must still run: each case is optimized and then executed
//! against SQLite.

mod common;

use common::ShopDb;
use nl2sql_gateway::db::{DataSource, QueryExecutor, SqliteSource};
use nl2sql_gateway::models::{DBServerVersion, Dialect};
use nl2sql_gateway::sql::{SqlInspector, SqlOptimizer, SqlStatementType};
use serde_json::json;

async fn rewrite_and_run(sql: &str, limit: Option<u64>) -> (String, Vec<Vec<serde_json::Value>>) {
    let db = ShopDb::create().await;
    let source = SqliteSource::new(db.path.clone(), QueryExecutor::default());
    let metadata = source.get_metadata().await.unwrap();
    let optimizer = SqlOptimizer::new(Dialect::Sqlite, None);
    let rewritten = optimizer
        .optimize_sql(sql, Some(&metadata.schema_types()), limit)
        .unwrap();
    let output = source.execute_raw_sql(&rewritten).await.unwrap();
    (rewritten, output.rows)
}

#[tokio::test]
async fn test_group_by_repair_runs() {
    let (sql, rows) = rewrite_and_run(
        "SELECT user_id, status, COUNT(*) AS n FROM orders GROUP BY user_id ORDER BY user_id, status",
        None,
    )
    .await;
    assert!(sql.contains("GROUP BY user_id, status"));
    assert_eq!(
        rows,
        vec![
            vec![json!(1), json!("open"), json!(1)],
            vec![json!(1), json!("paid"), json!(1)],
            vec![json!(2), json!("paid"), json!(1)],
        ]
    );
}

#[tokio::test]
async fn test_numeric_string_comparison_is_coerced() {
    let (sql, rows) = rewrite_and_run("SELECT name FROM users WHERE id = '2'", None).await;
    assert_eq!(sql, "SELECT name FROM users WHERE id = 2");
    assert_eq!(rows, vec![vec![json!("Bob")]]);
}

#[tokio::test]
async fn test_limit_cap_keeps_offset() {
    let (sql, rows) =
        rewrite_and_run("SELECT id FROM orders ORDER BY id LIMIT 10 OFFSET 1", Some(1)).await;
    assert_eq!(sql, "SELECT id FROM orders ORDER BY id LIMIT 1 OFFSET 1");
    assert_eq!(rows, vec![vec![json!(11)]]);
}

#[tokio::test]
async fn test_limited_subquery_in_predicate_runs() {
    let (_, rows) = rewrite_and_run(
        "SELECT name FROM users WHERE id IN (SELECT user_id FROM orders ORDER BY amount DESC LIMIT 1)",
        None,
    )
    .await;
    assert_eq!(rows, vec![vec![json!("Bob")]]);
}

#[test]
fn test_cte_inlined_only_for_old_mysql() {
    let sql = "WITH paid AS (SELECT user_id FROM orders WHERE status = 'paid') SELECT user_id FROM paid";
    let old = SqlOptimizer::new(Dialect::MySql, Some(DBServerVersion::new(5, 7, Some(44))));
    let rewritten = old.optimize_sql(sql, None, None).unwrap();
    assert!(!rewritten.contains("WITH"));
    assert!(rewritten.contains("AS paid"));

    let new = SqlOptimizer::new(Dialect::MySql, Some(DBServerVersion::new(8, 0, Some(36))));
    assert!(new.optimize_sql(sql, None, None).unwrap().starts_with("WITH"));
}

#[test]
fn test_inspector_gates_non_queries() {
    let inspector = SqlInspector::new(Dialect::Postgres);
    assert!(inspector.is_query_sql("SELECT 1"));
    assert!(!inspector.is_query_sql("UPDATE users SET name = 'x'"));
    assert!(!inspector.is_query_sql("SELECT 1; SELECT 2"));

    let stmt = inspector.syntax_valid("DROP TABLE users").unwrap();
    let (kind, _) = nl2sql_gateway::sql::inspector::classify_statement(&stmt);
    assert_eq!(kind, SqlStatementType::Ddl);
}
