//! Shared test utilities and fixtures
//!
//! Scripted collaborators for driving `CompletionDriver` without a network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use colloquy_engine::colloquy_context::InMemorySessionStore;
use colloquy_engine::{
    BackendError, CompletionDriver, CompletionSettings, FragmentStream, GenerationBackend,
    GenerationRequest, Session, SessionId, SessionStore, StoreError, StreamEvent,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const OWNER: &str = "user-42";

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Deliver these events, then close the stream.
    Events(Vec<StreamEvent>),
    /// Refuse the call before streaming.
    Reject(u16),
    /// Deliver these events, then keep the stream open forever.
    Hang(Vec<StreamEvent>),
}

impl Reply {
    pub fn text(fragments: &[&str]) -> Self {
        let mut events: Vec<StreamEvent> = fragments
            .iter()
            .map(|f| StreamEvent::TextDelta((*f).to_string()))
            .collect();
        events.push(StreamEvent::Done);
        Self::Events(events)
    }
}

/// Plays back one [`Reply`] per call and records every request.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl GenerationBackend for ScriptedBackend {
    async fn stream_complete(
        &self,
        request: GenerationRequest,
    ) -> Result<FragmentStream, BackendError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted reply left");

        match reply {
            Reply::Reject(status) => Err(BackendError::Api {
                status,
                body: "scripted rejection".to_string(),
            }),
            Reply::Events(events) => {
                let (tx, stream) = FragmentStream::channel(events.len().max(1));
                for event in events {
                    tx.try_send(event).unwrap();
                }
                Ok(stream)
            }
            Reply::Hang(events) => {
                let (tx, stream) = FragmentStream::channel(events.len().max(1));
                for event in events {
                    tx.try_send(event).unwrap();
                }
                let producer = tokio::spawn(async move {
                    let _keep_open = tx;
                    std::future::pending::<()>().await;
                });
                Ok(stream.with_producer(producer.abort_handle()))
            }
        }
    }
}

/// In-memory store that counts writes and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemorySessionStore,
    creates: AtomicUsize,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
    fail_lookups: AtomicBool,
}

impl RecordingStore {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    pub fn stored(&self, id: &SessionId) -> Session {
        self.inner.find_by_id(id).unwrap()
    }
}

impl SessionStore for RecordingStore {
    fn create(&self, session: &Session) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(session)
    }

    fn find_by_id(&self, id: &SessionId) -> Result<Session, StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.inner.find_by_id(id)
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(session)
    }
}

/// One token per whitespace-separated word.
pub fn words(text: &str, _model: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap()
}

pub type WordCount = fn(&str, &str) -> u32;

pub type TestDriver = CompletionDriver<RecordingStore, ScriptedBackend, WordCount>;

pub fn driver(replies: impl IntoIterator<Item = Reply>) -> TestDriver {
    CompletionDriver::new(
        RecordingStore::default(),
        ScriptedBackend::new(replies),
        words as WordCount,
    )
}

pub fn settings(budget: u32) -> CompletionSettings {
    CompletionSettings {
        model_max_tokens: Some(budget),
        initial_system_message: "be brief".to_string(),
        ..CompletionSettings::default()
    }
}

/// Mount a Chat Completions streaming response built from text fragments.
pub async fn mount_chat_stream(server: &MockServer, fragments: &[&str]) {
    let mut body = String::new();
    for fragment in fragments {
        let chunk = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": fragment}}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    let last = serde_json::json!({
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
    });
    body.push_str(&format!("data: {last}\n\n"));
    body.push_str("data: [DONE]\n\n");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}
