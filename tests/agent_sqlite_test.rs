//! End-to-end generation loop against a real SQLite file with scripted models.

mod common;

use common::{ScriptedModel, ShopDb};
use nl2sql_gateway::agent::{Agent, AgentOptions};
use nl2sql_gateway::db::{DataSource, QueryExecutor, SqliteSource};
use nl2sql_gateway::models::SchemaFormat;
use serde_json::json;

async fn shop() -> (ShopDb, SqliteSource) {
    let db = ShopDb::create().await;
    let source = SqliteSource::new(db.path.clone(), QueryExecutor::default());
    (db, source)
}

#[tokio::test]
async fn test_generated_sql_is_capped_and_executed() {
    let (_db, source) = shop().await;
    let metadata = source.get_metadata().await.unwrap();
    let model = ScriptedModel::new(&[r#"{"sql": "SELECT name FROM users ORDER BY id"}"#]);

    let output = Agent::new(&source, None, &model)
        .with_options(AgentOptions {
            result_num_limit: 2,
            ..AgentOptions::default()
        })
        .run("first users", &metadata, "")
        .await;

    assert_eq!(output.sql, "SELECT name FROM users ORDER BY id LIMIT 2");
    assert_eq!(output.columns, vec!["name"]);
    assert_eq!(output.rows, vec![vec![json!("Alice")], vec![json!("Bob")]]);
    assert_eq!(output.attempts, 1);
    assert!(output.error.is_none());
}

#[tokio::test]
async fn test_database_error_feeds_next_attempt() {
    let (_db, source) = shop().await;
    let metadata = source.get_metadata().await.unwrap();
    let model = ScriptedModel::new(&[
        r#"{"sql": "SELECT total FROM orders"}"#,
        r#"{"sql": "SELECT SUM(amount) AS total FROM orders"}"#,
    ]);

    let output = Agent::new(&source, None, &model)
        .run("total order amount", &metadata, "amount is in euros")
        .await;

    assert_eq!(model.calls(), 2);
    assert_eq!(output.attempts, 2);
    assert_eq!(output.rows, vec![vec![json!(114.5)]]);
    assert_eq!(output.input_tokens, 20);
    assert_eq!(output.output_tokens, 4);

    let prompts = model.prompts.lock().unwrap();
    let retry = &prompts[1][1].content;
    assert!(retry.contains("SELECT total FROM orders"));
    assert!(retry.contains("Hint: amount is in euros"));
}

#[tokio::test]
async fn test_prompt_carries_requested_schema_format() {
    let (_db, source) = shop().await;
    let metadata = source.get_metadata().await.unwrap();
    let model = ScriptedModel::new(&[r#"{"answer": "There are two tables."}"#]);

    let output = Agent::new(&source, None, &model)
        .with_options(AgentOptions {
            schema_format: SchemaFormat::MSchema,
            ..AgentOptions::default()
        })
        .run("how many tables are there?", &metadata, "")
        .await;

    assert_eq!(output.answer, "There are two tables.");
    assert!(output.sql.is_empty());
    let prompts = model.prompts.lock().unwrap();
    assert!(prompts[0][0].content.contains("【DB_ID】 shop"));
    assert!(prompts[0][0].content.contains("Database server info: SQLite"));
}

#[tokio::test]
async fn test_evaluator_rejection_triggers_retry() {
    let (_db, source) = shop().await;
    let metadata = source.get_metadata().await.unwrap();
    let generator = ScriptedModel::new(&[
        r#"{"sql": "SELECT name FROM users"}"#,
        r#"{"sql": "SELECT name FROM users WHERE city = 'Paris'"}"#,
    ]);
    let evaluator = ScriptedModel::new(&[
        r#"{"relevant": false, "reason": "question asks for Paris only"}"#,
        r#"{"relevant": true, "reason": "ok"}"#,
    ]);

    let output = Agent::new(&source, None, &generator)
        .with_evaluator(&evaluator)
        .run("users in Paris", &metadata, "")
        .await;

    assert_eq!(output.rows, vec![vec![json!("Bob")]]);
    assert_eq!(evaluator.calls(), 2);
    assert!(output.error.is_none());
}
