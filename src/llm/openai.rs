//! OpenAI-compatible chat completions over server-sent events.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, warn};

use super::{ChatMessage, Completion, LanguageModel, LlmConfig, LlmError, LlmResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ERROR_BODY: usize = 2000;

pub struct OpenAiClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiClient {
    /// `timeout` bounds a whole completion, stream included.
    pub fn new(config: LlmConfig, timeout: Duration) -> LlmResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, messages: &[ChatMessage]) -> JsonValue {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if let Some(map) = body.as_object_mut() {
            if let Some(t) = self.config.temperature {
                map.insert("temperature".to_string(), json!(t));
            }
            if let Some(n) = self.config.max_tokens {
                map.insert("max_tokens".to_string(), json!(n));
            }
            for (key, value) in &self.config.extra {
                map.insert(key.clone(), value.clone());
            }
        }
        body
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<Completion> {
        let url = self.config.completions_url();
        debug!(model = %self.config.model, url = %url, messages = messages.len(), "Sending chat completion");

        let mut request = self.client.post(&url).json(&self.request_body(messages));
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            warn!(model = %self.config.model, status = status.as_u16(), "LLM provider rejected request");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut completion = drain_chat_stream(response.bytes_stream()).await?;
        if completion.input_tokens == 0 && completion.output_tokens == 0 {
            completion.input_tokens = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
            completion.output_tokens = estimate_tokens(&completion.content);
        }
        info!(
            model = %self.config.model,
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            "Chat completion finished"
        );
        Ok(completion)
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkContent>,
    /// Providers that ignore `stream` answer with a single full message.
    #[serde(default)]
    message: Option<ChunkContent>,
}

#[derive(Debug, Deserialize)]
struct ChunkContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Read a chat completion SSE stream to the end.
///
/// Content deltas are concatenated in order; usage is taken from the last
/// chunk that carries it and is left at zero when none does.
pub async fn drain_chat_stream<S, B, E>(stream: S) -> LlmResult<Completion>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let events = stream.eventsource();
    tokio::pin!(events);

    let mut completion = Completion::default();
    loop {
        let next = tokio::time::timeout(STREAM_IDLE_TIMEOUT, events.next())
            .await
            .map_err(|_| LlmError::Stream("stream idle timeout".to_string()))?;
        let Some(item) = next else {
            break;
        };
        let event = item.map_err(|e| LlmError::Stream(e.to_string()))?;

        if event.data.is_empty() {
            continue;
        }
        if event.data == "[DONE]" {
            break;
        }

        let chunk: ChatChunk = match serde_json::from_str(&event.data) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "Skipping undecodable stream chunk");
                continue;
            }
        };
        if let Some(error) = chunk.error {
            return Err(LlmError::Stream(error.to_string()));
        }
        for choice in chunk.choices {
            let content = choice
                .delta
                .and_then(|d| d.content)
                .or_else(|| choice.message.and_then(|m| m.content));
            if let Some(content) = content {
                completion.content.push_str(&content);
            }
        }
        if let Some(usage) = chunk.usage {
            completion.input_tokens = usage.prompt_tokens;
            completion.output_tokens = usage.completion_tokens;
        }
    }
    Ok(completion)
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use futures_util::stream;
    use std::convert::Infallible;

    fn sse(body: &'static str) -> impl Stream<Item = Result<Bytes, Infallible>> {
        stream::iter([Ok::<_, Infallible>(Bytes::from_static(body.as_bytes()))])
    }

    #[tokio::test]
    async fn test_drain_concatenates_deltas_and_reads_usage() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"sql\\\": \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\\\"SELECT 1\\\"}\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":120,\"completion_tokens\":9}}\n\n",
            "data: [DONE]\n\n",
        );
        let completion = drain_chat_stream(sse(body)).await.unwrap();
        assert_eq!(completion.content, "{\"sql\": \"SELECT 1\"}");
        assert_eq!(completion.input_tokens, 120);
        assert_eq!(completion.output_tokens, 9);
    }

    #[tokio::test]
    async fn test_drain_handles_chunk_boundaries() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let (a, b) = body.split_at(17);
        let chunks = stream::iter([
            Ok::<_, Infallible>(Bytes::from_static(a.as_bytes())),
            Ok::<_, Infallible>(Bytes::from_static(b.as_bytes())),
        ]);
        let completion = drain_chat_stream(chunks).await.unwrap();
        assert_eq!(completion.content, "hello");
        assert_eq!(completion.input_tokens, 0);
    }

    #[tokio::test]
    async fn test_drain_accepts_full_message() {
        let body = "data: {\"choices\":[{\"message\":{\"content\":\"done\"}}]}\n\n";
        let completion = drain_chat_stream(sse(body)).await.unwrap();
        assert_eq!(completion.content, "done");
    }

    #[tokio::test]
    async fn test_drain_surfaces_provider_error() {
        let body = "data: {\"error\":{\"message\":\"rate limited\"}}\n\n";
        let err = drain_chat_stream(sse(body)).await.unwrap_err();
        assert!(matches!(err, LlmError::Stream(msg) if msg.contains("rate limited")));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_request_body_merges_extra() {
        let mut config = LlmConfig::new("gpt-4o-mini");
        config.temperature = Some(0.0);
        config.extra.insert("seed".to_string(), json!(7));
        let client = OpenAiClient::new(config, Duration::from_secs(5)).unwrap();
        let body = client.request_body(&[ChatMessage::user("hi")]);
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["stream_options"]["include_usage"], json!(true));
        assert_eq!(body["seed"], json!(7));
        assert_eq!(body["messages"][0]["role"], json!("user"));
    }
}
