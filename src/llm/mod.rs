//! Language model access.
//!
//! The agent talks to models only through [`LanguageModel`]; [`OpenAiClient`]
//! is the HTTP implementation for OpenAI-compatible chat completion APIs.

mod openai;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use openai::{OpenAiClient, drain_chat_stream, estimate_tokens};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Invalid LLM configuration: {0}")]
    Config(String),

    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM stream error: {0}")]
    Stream(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A fully drained model reply with its token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<Completion>;
}

/// Per-call model settings, as sent by API clients.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Extra request body fields passed through to the provider.
    #[serde(default)]
    pub extra: BTreeMap<String, JsonValue>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl LlmConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            provider: default_provider(),
            model: model.into(),
            api_key: String::new(),
            base_url: default_base_url(),
            temperature: None,
            max_tokens: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> LlmResult<()> {
        if self.model.trim().is_empty() {
            return Err(LlmError::Config("model must not be empty".to_string()));
        }
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| LlmError::Config(format!("invalid base_url '{}': {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LlmError::Config(format!(
                "base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(LlmError::Config(format!(
                "temperature must be within 0..=2, got {}",
                t
            )));
        }
        Ok(())
    }

    /// Chat completions endpoint under `base_url`.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("extra", &self.extra)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: LlmConfig = serde_json::from_str(r#"{"model":"gpt-4o-mini"}"#).unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(
            config.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LlmConfig::new("m");
        config.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = LlmConfig::new("m");
        config.temperature = Some(3.5);
        assert!(config.validate().is_err());

        assert!(LlmConfig::new("  ").validate().is_err());
    }

    #[test]
    fn test_api_key_redacted() {
        let mut config = LlmConfig::new("m");
        config.api_key = "sk-secret".to_string();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let mut config = LlmConfig::new("m");
        config.base_url = "http://localhost:11434/v1/".to_string();
        assert_eq!(
            config.completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }
}
