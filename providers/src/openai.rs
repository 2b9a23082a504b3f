//! OpenAI-compatible Chat Completions backend.
//!
//! Talks to `{base_url}/chat/completions` with `stream: true` and maps
//! `choices[0].delta.content` to `TextDelta`. Only the first candidate is
//! streamed back even when `n > 1`.

use std::time::Duration;

use serde_json::{Value, json};

use colloquy_types::text::truncate_with_ellipsis;
use colloquy_types::{ConfigurationError, GenerationParams, StreamEvent};

use crate::sse::{SseParseAction, SseParser, emit_or_continue, process_sse_stream};
use crate::sse_types::chat_completions as typed;
use crate::{
    BackendError, DEFAULT_STREAM_IDLE_TIMEOUT_SECS, FRAGMENT_CHANNEL_CAPACITY, FragmentStream,
    GenerationBackend, GenerationRequest, base_client_builder, read_capped_error_body,
};

pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat Completions rejects requests with more stop sequences than this.
pub const MAX_STOP_SEQUENCES: usize = 4;

const MAX_ERROR_DETAIL_CHARS: usize = 2000;

#[derive(Default)]
struct ChatCompletionsParser {
    finished: bool,
}

impl SseParser for ChatCompletionsParser {
    fn parse(&mut self, json: &Value) -> SseParseAction {
        let chunk: typed::Chunk = match serde_json::from_value(json.clone()) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("Failed to parse chat completion chunk: {e}");
                return SseParseAction::Continue;
            }
        };

        if let Some(error) = chunk.error {
            let kind = error.error_type.as_deref().unwrap_or("error");
            return SseParseAction::Error(format!("OpenAI {kind}: {}", error.message));
        }
        if self.finished {
            return SseParseAction::Continue;
        }

        let mut events = Vec::new();
        for choice in chunk.choices.into_iter().filter(|c| c.index == 0) {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                events.push(StreamEvent::TextDelta(content));
            }
            if let Some(refusal) = choice.delta.refusal.filter(|r| !r.is_empty()) {
                events.push(StreamEvent::TextDelta(refusal));
            }
            if let Some(reason) = choice.finish_reason {
                tracing::debug!(finish_reason = %reason, "Chat completion finished");
                self.finished = true;
                events.push(StreamEvent::Done);
            }
        }
        emit_or_continue(events)
    }

    fn provider_name(&self) -> &'static str {
        "OpenAI"
    }
}

fn build_request_body(request: &GenerationRequest) -> Value {
    let params = &request.params;
    let messages: Vec<Value> = request
        .turns
        .iter()
        .map(|turn| {
            json!({
                "role": turn.role.as_str(),
                "content": turn.content,
            })
        })
        .collect();

    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), json!(request.model));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert("max_tokens".to_string(), json!(params.max_output_tokens()));
    body.insert("temperature".to_string(), json!(params.temperature()));
    body.insert("top_p".to_string(), json!(params.top_p()));
    body.insert("n".to_string(), json!(params.candidate_count()));
    if !params.stop_sequences().is_empty() {
        body.insert("stop".to_string(), json!(params.stop_sequences()));
    }
    body.insert(
        "presence_penalty".to_string(),
        json!(params.presence_penalty()),
    );
    body.insert(
        "frequency_penalty".to_string(),
        json!(params.frequency_penalty()),
    );
    body.insert("stream".to_string(), json!(true));

    Value::Object(body)
}

fn validate(params: &GenerationParams) -> Result<(), ConfigurationError> {
    let count = params.stop_sequences().len();
    if count > MAX_STOP_SEQUENCES {
        return Err(ConfigurationError::TooManyStopSequences {
            count,
            max: MAX_STOP_SEQUENCES,
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct OpenAIBackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub idle_timeout: Duration,
}

impl std::fmt::Debug for OpenAIBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIBackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl OpenAIBackendConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: OPENAI_API_BASE_URL.to_string(),
            api_key: api_key.into(),
            idle_timeout: Duration::from_secs(DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

pub struct OpenAIBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    idle_timeout: Duration,
}

impl std::fmt::Debug for OpenAIBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIBackend")
            .field("endpoint", &self.endpoint)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl OpenAIBackend {
    /// Plain `http://` base URLs are allowed (local proxies, test servers);
    /// anything else is restricted to HTTPS.
    pub fn new(config: OpenAIBackendConfig) -> Result<Self, BackendError> {
        let base_url = config.base_url.trim().trim_end_matches('/');
        let client = base_client_builder()
            .https_only(!base_url.starts_with("http://"))
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{base_url}/chat/completions"),
            api_key: config.api_key,
            idle_timeout: config.idle_timeout,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl GenerationBackend for OpenAIBackend {
    async fn stream_complete(
        &self,
        request: GenerationRequest,
    ) -> Result<FragmentStream, BackendError> {
        self.check_params(&request.params)?;
        let body = build_request_body(&request);

        tracing::debug!(
            model = %request.model,
            turns = request.turns.len(),
            endpoint = %self.endpoint,
            "Sending chat completion request"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_capped_error_body(response).await;
            tracing::warn!(status = status.as_u16(), "Chat completion request rejected");
            return Err(BackendError::Api {
                status: status.as_u16(),
                body: truncate_with_ellipsis(&body, MAX_ERROR_DETAIL_CHARS),
            });
        }

        let (tx, stream) = FragmentStream::channel(FRAGMENT_CHANNEL_CAPACITY);
        let idle_timeout = self.idle_timeout;
        let producer = tokio::spawn(async move {
            let mut parser = ChatCompletionsParser::default();
            process_sse_stream(response.bytes_stream(), &mut parser, &tx, idle_timeout).await;
        });
        Ok(stream.with_producer(producer.abort_handle()))
    }

    fn check_params(&self, params: &GenerationParams) -> Result<(), ConfigurationError> {
        validate(params)
    }
}
