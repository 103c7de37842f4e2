//! Decoding of model replies.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("invalid fixed json fence pattern")
});

static SQL_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```sql\s*(.*?)```").expect("invalid fixed sql fence pattern")
});

/// What the generation model produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResponse {
    /// A direct natural-language answer; no SQL needed.
    Answer(String),
    Sql(String),
    /// The reply could not be understood.
    Error(String),
}

impl GenerationResponse {
    /// Decode `{"sql": ...}` or `{"answer": ...}` from a reply, accepting a
    /// fenced JSON block, the first `{...}` span, or a fenced SQL block.
    pub fn parse(text: &str) -> Self {
        if let Some(object) = extract_json_object(text) {
            let field = |key: &str| {
                object
                    .get(key)
                    .and_then(JsonValue::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            if let Some(sql) = field("sql") {
                return Self::Sql(sql);
            }
            if let Some(answer) = field("answer") {
                return Self::Answer(answer);
            }
            return Self::Error(
                "Response JSON must contain a non-empty \"sql\" or \"answer\" field".to_string(),
            );
        }

        if let Some(sql) = SQL_FENCE
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
        {
            return Self::Sql(sql.to_string());
        }

        Self::Error(
            "Response is not valid JSON. Reply with {\"sql\": \"...\"} or {\"answer\": \"...\"}"
                .to_string(),
        )
    }
}

/// The evaluation model's verdict on a result set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Evaluation {
    pub relevant: bool,
    #[serde(default)]
    pub reason: String,
}

impl Evaluation {
    /// `None` when the reply holds no readable verdict.
    pub fn parse(text: &str) -> Option<Self> {
        let object = extract_json_object(text)?;
        serde_json::from_value(JsonValue::Object(object)).ok()
    }
}

fn extract_json_object(text: &str) -> Option<serde_json::Map<String, JsonValue>> {
    let fenced = JSON_FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());
    let candidate = fenced.or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        (end > start).then(|| &text[start..=end])
    })?;
    match serde_json::from_str(candidate) {
        Ok(JsonValue::Object(object)) => Some(object),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json_sql() {
        assert_eq!(
            GenerationResponse::parse(r#"{"sql": "SELECT 1"}"#),
            GenerationResponse::Sql("SELECT 1".to_string())
        );
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let text = "Here you go:\n```json\n{\"sql\": \"SELECT name FROM users\"}\n```\nDone.";
        assert_eq!(
            GenerationResponse::parse(text),
            GenerationResponse::Sql("SELECT name FROM users".to_string())
        );
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(
            GenerationResponse::parse(r#"{"sql": "", "answer": "There are no tables."}"#),
            GenerationResponse::Answer("There are no tables.".to_string())
        );
    }

    #[test]
    fn test_parse_sql_fence_fallback() {
        let text = "```sql\nSELECT COUNT(*) FROM orders\n```";
        assert_eq!(
            GenerationResponse::parse(text),
            GenerationResponse::Sql("SELECT COUNT(*) FROM orders".to_string())
        );
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(matches!(
            GenerationResponse::parse("I cannot help with that"),
            GenerationResponse::Error(_)
        ));
        assert!(matches!(
            GenerationResponse::parse(r#"{"note": "nothing"}"#),
            GenerationResponse::Error(_)
        ));
    }

    #[test]
    fn test_parse_evaluation() {
        let verdict = Evaluation::parse(r#"{"relevant": false, "reason": "wrong year"}"#).unwrap();
        assert!(!verdict.relevant);
        assert_eq!(verdict.reason, "wrong year");
        assert!(Evaluation::parse("looks fine").is_none());
    }
}
