//! HTTP error responses.
//!
//! Every failure is rendered as `400 {"msg": ..., "error": ...}`: `msg` is a
//! human-readable summary, `error` the raw underlying error string.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::{DataSourceError, SqlError};
use crate::llm::LlmError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub msg: String,
    pub error: String,
}

impl ApiError {
    pub fn new(msg: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            error: error.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

impl From<DataSourceError> for ApiError {
    fn from(err: DataSourceError) -> Self {
        let msg = match err.suggestion() {
            Some(suggestion) => format!("Data source request failed ({}). {}", err.kind(), suggestion),
            None => format!("Data source request failed ({})", err.kind()),
        };
        Self::new(msg, err.to_string())
    }
}

impl From<SqlError> for ApiError {
    fn from(err: SqlError) -> Self {
        Self::new(format!("SQL execution failed ({})", err.kind), err.to_string())
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        Self::new("Language model call failed", err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new("Invalid request body", rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_keeps_raw_error() {
        let api: ApiError = SqlError::syntax("no such table: foo", None).into();
        assert!(api.msg.contains("SyntaxError"));
        assert_eq!(api.error, "SyntaxError: no such table: foo");
    }

    #[test]
    fn test_data_source_error_message() {
        let api: ApiError = DataSourceError::invalid_config("host must not be empty").into();
        assert!(!api.msg.is_empty());
        assert!(api.error.contains("host must not be empty"));
    }

    #[test]
    fn test_status_is_bad_request() {
        let response = ApiError::new("m", "e").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
