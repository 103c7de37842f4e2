//! Natural-language to SQL orchestration.
//!
//! One [`Agent::run`] drives the loop
//! generate -> syntax check -> optimize -> execute -> (evaluate)
//! for at most `max_attempts` generations. Syntax errors, undecodable model
//! replies and results the evaluator rejects feed back into the next attempt;
//! any other execution error and any failed generation call end the run.

pub mod prompt;
pub mod response;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::db::DataSource;
use crate::error::SqlError;
use crate::llm::LanguageModel;
use crate::models::{DBServerVersion, DatabaseMetadata, SchemaFormat};
use crate::sql::inspector::{SqlInspector, classify_statement, is_query};
use crate::sql::optimizer::SqlOptimizer;

use prompt::{PreviousAttempt, evaluation_messages, generation_messages, schema_description};
use response::{Evaluation, GenerationResponse};

pub const DEFAULT_MAX_ATTEMPTS: usize = 2;
pub const DEFAULT_RESULT_NUM_LIMIT: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentOptions {
    pub max_attempts: usize,
    /// Row cap injected as LIMIT; zero disables the cap.
    pub result_num_limit: u64,
    /// Must match the format the caller expects the schema to be shown in.
    pub schema_format: SchemaFormat,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            result_num_limit: DEFAULT_RESULT_NUM_LIMIT,
            schema_format: SchemaFormat::default(),
        }
    }
}

/// Result of one run. `answer` is empty when the model produced SQL.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentOutput {
    pub answer: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Generation calls made.
    pub attempts: usize,
    /// Why the last attempt did not produce a result, if it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentOutput {
    fn add_usage(&mut self, input: u64, output: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
    }
}

pub struct Agent<'a> {
    source: &'a dyn DataSource,
    version: Option<DBServerVersion>,
    generator: &'a dyn LanguageModel,
    evaluator: Option<&'a dyn LanguageModel>,
    options: AgentOptions,
}

impl<'a> Agent<'a> {
    pub fn new(
        source: &'a dyn DataSource,
        version: Option<DBServerVersion>,
        generator: &'a dyn LanguageModel,
    ) -> Self {
        Self {
            source,
            version,
            generator,
            evaluator: None,
            options: AgentOptions::default(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn LanguageModel) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    /// Answer `query` against `metadata`.
    ///
    /// Failures never discard progress: the output carries whatever SQL and
    /// rows were produced, the tokens of every call made, and
    /// [`AgentOutput::error`] when no result was reached.
    pub async fn run(
        &self,
        query: &str,
        metadata: &DatabaseMetadata,
        evidence: &str,
    ) -> AgentOutput {
        let dialect = self.source.dialect();
        let schema = schema_description(
            dialect,
            self.version.as_ref(),
            metadata,
            self.options.schema_format,
        );
        let schema_types = metadata.schema_types();
        let inspector = SqlInspector::new(dialect);
        let optimizer = SqlOptimizer::new(dialect, self.version);
        let limit = Some(self.options.result_num_limit).filter(|n| *n > 0);

        let mut output = AgentOutput::default();
        let mut previous: Option<PreviousAttempt> = None;

        for attempt in 1..=self.options.max_attempts.max(1) {
            output.attempts = attempt;
            let messages = generation_messages(query, &schema, evidence, previous.as_ref());
            let completion = match self.generator.complete(&messages).await {
                Ok(completion) => completion,
                Err(e) => {
                    warn!(attempt, error = %e, "Generation call failed");
                    output.error = Some(e.to_string());
                    return output;
                }
            };
            output.add_usage(completion.input_tokens, completion.output_tokens);

            let sql = match GenerationResponse::parse(&completion.content) {
                GenerationResponse::Answer(answer) => {
                    info!(attempt, "Model answered without SQL");
                    output.answer = answer;
                    output.error = None;
                    return output;
                }
                GenerationResponse::Error(error) => {
                    warn!(attempt, error = %error, "Undecodable generation reply");
                    output.error = Some(error.clone());
                    previous = Some(PreviousAttempt {
                        sql: String::new(),
                        error,
                    });
                    continue;
                }
                GenerationResponse::Sql(sql) => sql,
            };
            output.sql = sql.clone();

            let stmt = match inspector.syntax_valid(&sql) {
                Ok(stmt) => stmt,
                Err(e) => {
                    let error = SqlError::syntax(e.to_string(), None);
                    warn!(attempt, error = %error, "Generated SQL does not parse");
                    output.error = Some(error.to_string());
                    previous = Some(PreviousAttempt {
                        sql,
                        error: error.message,
                    });
                    continue;
                }
            };

            if !is_query(&stmt) {
                let (_, operation) = classify_statement(&stmt);
                let error = SqlError::not_allowed(format!(
                    "{} statements are not executed; only read queries are allowed",
                    operation
                ));
                warn!(attempt, operation, "Generated SQL is not a query");
                output.error = Some(error.to_string());
                return output;
            }

            let sql = optimizer.optimize(stmt, Some(&schema_types), limit);
            output.sql = sql.clone();
            debug!(attempt, sql = %sql, "Executing generated SQL");

            let result = match self.source.execute_raw_sql(&sql).await {
                Ok(result) => result,
                Err(error) if error.is_recoverable() => {
                    warn!(attempt, error = %error, "Generated SQL failed, retrying");
                    output.error = Some(error.to_string());
                    previous = Some(PreviousAttempt {
                        sql,
                        error: error.message,
                    });
                    continue;
                }
                Err(error) => {
                    warn!(attempt, error = %error, "Generated SQL failed");
                    output.error = Some(error.to_string());
                    return output;
                }
            };

            output.columns = result.columns.clone();
            output.rows = result.rows.clone();
            output.error = None;

            if let Some(evaluator) = self.evaluator {
                let verdict = match evaluator
                    .complete(&evaluation_messages(query, &sql, &result))
                    .await
                {
                    Ok(completion) => {
                        output.add_usage(completion.input_tokens, completion.output_tokens);
                        Evaluation::parse(&completion.content)
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "Evaluation call failed, keeping result");
                        None
                    }
                };

                match verdict {
                    Some(verdict) if !verdict.relevant => {
                        let reason = if verdict.reason.is_empty() {
                            "The result does not answer the question".to_string()
                        } else {
                            verdict.reason
                        };
                        warn!(attempt, reason = %reason, "Evaluator rejected the result");
                        output.columns.clear();
                        output.rows.clear();
                        output.error = Some(reason.clone());
                        previous = Some(PreviousAttempt { sql, error: reason });
                        continue;
                    }
                    Some(_) => {}
                    None => debug!(attempt, "Unreadable evaluation reply, keeping result"),
                }
            }

            info!(attempt, rows = output.rows.len(), "Query answered");
            return output;
        }

        warn!(
            attempts = output.attempts,
            error = output.error.as_deref().unwrap_or_default(),
            "Attempts exhausted"
        );
        output
    }
}
