//! Request handlers for the `/data_source/*` endpoints.
//!
//! Each request builds its own adapter from the posted configuration; nothing
//! outlives the request.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::agent::{Agent, AgentOptions};
use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::db::{AnySource, DataSource, connect};
use crate::llm::{LlmConfig, OpenAiClient};
use crate::models::{
    DBServerVersion, DEFAULT_MAX_EXAMPLE_LEN, DEFAULT_VALUE_NUM, DataSourceConfig,
    DatabaseMetadata, QueryOutput, SchemaFormat,
};

/// `{cols, data}` result shape of the HTTP API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlResult {
    pub cols: Vec<String>,
    pub data: Vec<Vec<JsonValue>>,
}

impl From<QueryOutput> for SqlResult {
    fn from(output: QueryOutput) -> Self {
        Self {
            cols: output.columns,
            data: output.rows,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SqlQueryRequest {
    pub source_config: DataSourceConfig,
    pub sql: String,
}

#[derive(Debug, Deserialize)]
pub struct ExampleParams {
    pub value_num: Option<usize>,
    pub max_len: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NlQueryRequest {
    pub source_config: DataSourceConfig,
    pub query: String,
    /// Introspected when absent.
    #[serde(default)]
    pub retrieved_metadata: Option<DatabaseMetadata>,
    pub generate_sql_llm: LlmConfig,
    #[serde(default)]
    pub evaluate_sql_llm: Option<LlmConfig>,
    #[serde(default)]
    pub schema_format: SchemaFormat,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub result_num_limit: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct NlQueryResponse {
    pub answer: String,
    pub sql: String,
    pub sql_res: SqlResult,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Why no result was reached, when it was not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn build_source(state: &AppState, config: &DataSourceConfig) -> ApiResult<AnySource> {
    Ok(connect(config, state.executor)?)
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn conn_test(
    State(state): State<AppState>,
    payload: Result<Json<DataSourceConfig>, JsonRejection>,
) -> ApiResult<Json<&'static str>> {
    let Json(config) = payload?;
    let source = build_source(&state, &config)?;
    if source.conn_test().await {
        Ok(Json("ok"))
    } else {
        Err(ApiError::new(
            "Connection test failed",
            format!(
                "Could not reach the {} data source",
                source.dialect().display_name()
            ),
        ))
    }
}

pub async fn get_metadata(
    State(state): State<AppState>,
    payload: Result<Json<DataSourceConfig>, JsonRejection>,
) -> ApiResult<Json<DatabaseMetadata>> {
    let Json(config) = payload?;
    let source = build_source(&state, &config)?;
    let metadata = source.get_metadata().await?;
    info!(tables = metadata.tables.len(), "Metadata introspected");
    Ok(Json(metadata))
}

pub async fn get_metadata_with_value_examples(
    State(state): State<AppState>,
    Query(params): Query<ExampleParams>,
    payload: Result<Json<DataSourceConfig>, JsonRejection>,
) -> ApiResult<Json<DatabaseMetadata>> {
    let Json(config) = payload?;
    let source = build_source(&state, &config)?;
    let metadata = source
        .get_metadata_with_value_examples(
            params.value_num.unwrap_or(DEFAULT_VALUE_NUM),
            params.max_len.unwrap_or(DEFAULT_MAX_EXAMPLE_LEN),
        )
        .await?;
    Ok(Json(metadata))
}

pub async fn get_server_version(
    State(state): State<AppState>,
    payload: Result<Json<DataSourceConfig>, JsonRejection>,
) -> ApiResult<Json<DBServerVersion>> {
    let Json(config) = payload?;
    let source = build_source(&state, &config)?;
    Ok(Json(source.get_server_version().await?))
}

pub async fn sql_query(
    State(state): State<AppState>,
    payload: Result<Json<SqlQueryRequest>, JsonRejection>,
) -> ApiResult<Json<SqlResult>> {
    let Json(request) = payload?;
    let source = build_source(&state, &request.source_config)?;
    let output = source.execute_raw_sql(&request.sql).await?;
    Ok(Json(output.into()))
}

pub async fn query_by_nl(
    State(state): State<AppState>,
    payload: Result<Json<NlQueryRequest>, JsonRejection>,
) -> ApiResult<Json<NlQueryResponse>> {
    let Json(request) = payload?;
    let source = build_source(&state, &request.source_config)?;

    let generator = OpenAiClient::new(request.generate_sql_llm, state.llm_timeout)?;
    let evaluator = request
        .evaluate_sql_llm
        .map(|config| OpenAiClient::new(config, state.llm_timeout))
        .transpose()?;

    let metadata = match request.retrieved_metadata {
        Some(metadata) => metadata,
        None => source.get_metadata().await?,
    };
    let version = match source.get_server_version().await {
        Ok(version) => Some(version),
        Err(e) => {
            warn!(error = %e, "Server version probe failed, continuing without it");
            None
        }
    };

    let options = AgentOptions {
        result_num_limit: request
            .result_num_limit
            .unwrap_or(state.agent_options.result_num_limit),
        schema_format: request.schema_format,
        ..state.agent_options
    };
    let mut agent = Agent::new(&source, version, &generator).with_options(options);
    if let Some(evaluator) = evaluator.as_ref() {
        agent = agent.with_evaluator(evaluator);
    }

    let output = agent
        .run(&request.query, &metadata, &request.evidence)
        .await;
    info!(
        attempts = output.attempts,
        input_tokens = output.input_tokens,
        output_tokens = output.output_tokens,
        "Natural-language query finished"
    );

    Ok(Json(NlQueryResponse {
        answer: output.answer,
        sql: output.sql,
        sql_res: SqlResult {
            cols: output.columns,
            data: output.rows,
        },
        input_tokens: output.input_tokens,
        output_tokens: output.output_tokens,
        error: output.error,
    }))
}
