//! Text-generation backends with streaming support.
//!
//! # Architecture
//!
//! - [`GenerationBackend`] - the capability the completion driver consumes:
//!   role/content turns plus generation parameters in, a [`FragmentStream`] out
//! - [`openai`] - OpenAI-compatible Chat Completions client over SSE
//!
//! # Streaming Events
//!
//! | Event | Description |
//! |-------|-------------|
//! | `TextDelta` | Incremental text content from the model |
//! | `Done` | Stream completed successfully |
//! | `Error` | Stream terminated with an error |
//!
//! # Error Handling
//!
//! Failures before the first byte of the body (bad request, transport error,
//! non-2xx status) are returned as [`BackendError`]. Anything after that is
//! delivered in-band as `StreamEvent::Error`, so fragments received before
//! the failure are still observable.

mod sse;
pub mod sse_types;

pub mod openai;

use std::time::Duration;

use tokio::sync::mpsc;

pub use colloquy_types;
use colloquy_types::{ConfigurationError, GenerationParams, StreamEvent, Turn};

const CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

const TCP_KEEPALIVE_SECS: u64 = 60;

const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Events buffered between a backend's producer task and the consumer.
const FRAGMENT_CHANNEL_CAPACITY: usize = 64;

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .user_agent(concat!("colloquy/", env!("CARGO_PKG_VERSION")))
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ConfigurationError),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Everything a backend needs for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub turns: Vec<Turn>,
    pub params: GenerationParams,
}

/// Receiving half of a generation stream.
///
/// Dropping it aborts the producer task (if any), which closes the
/// underlying HTTP response.
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::Receiver<StreamEvent>,
    producer: Option<tokio::task::AbortHandle>,
}

impl FragmentStream {
    /// A bounded event channel whose receiver is wrapped as a stream.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<StreamEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::from_receiver(rx))
    }

    #[must_use]
    pub fn from_receiver(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self { rx, producer: None }
    }

    #[must_use]
    pub fn with_producer(mut self, handle: tokio::task::AbortHandle) -> Self {
        self.producer = Some(handle);
        self
    }

    /// Next event, or `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
    }
}

/// A text-generation capability.
///
/// Implementations resolve once the stream is established; fragments then
/// arrive through the returned [`FragmentStream`] in generation order, ending
/// with `Done` on success.
pub trait GenerationBackend: Send + Sync {
    fn stream_complete(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<FragmentStream, BackendError>> + Send;

    /// Reject parameters this backend can never serve.
    ///
    /// Callers run this before creating anything that depends on the
    /// parameters; `stream_complete` checks them again.
    fn check_params(&self, _params: &GenerationParams) -> Result<(), ConfigurationError> {
        Ok(())
    }
}

/// Read at most `MAX_ERROR_BODY_BYTES` of an error response body.
pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
