//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use nl2sql_gateway::llm::{ChatMessage, Completion, LanguageModel, LlmResult};
use sqlx::Connection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use tempfile::TempDir;

const SHOP_SCHEMA: &str = r#"
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        city VARCHAR(32),
        avatar BLOB
    );
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id),
        amount REAL,
        status TEXT
    );
    INSERT INTO users (id, name, city, avatar) VALUES
        (1, 'Alice', 'Berlin', X'00FF'),
        (2, 'Bob', 'Paris', NULL),
        (3, 'Carol', 'Berlin', NULL);
    INSERT INTO orders (id, user_id, amount, status) VALUES
        (10, 1, 12.5, 'paid'),
        (11, 1, 3.0, 'open'),
        (12, 2, 99.0, 'paid');
"#;

/// A temporary SQLite database with `users` and `orders`.
pub struct ShopDb {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl ShopDb {
    pub async fn create() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.db");
        seed(&path, SHOP_SCHEMA).await;
        Self { dir, path }
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// The adapters open SQLite read-only, so fixtures are written through a
/// separate writable connection.
pub async fn seed(path: &Path, sql: &str) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);
    let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
    sqlx::raw_sql(sql).execute(&mut conn).await.unwrap();
    conn.close().await.unwrap();
}

/// Replies with canned completions in order and records every prompt.
pub struct ScriptedModel {
    replies: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        let mut replies: Vec<String> = replies.iter().map(|r| r.to_string()).collect();
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<Completion> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let content = self.replies.lock().unwrap().pop().unwrap_or_default();
        Ok(Completion {
            content,
            input_tokens: 10,
            output_tokens: 2,
        })
    }
}
