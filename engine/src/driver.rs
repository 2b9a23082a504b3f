//! One request/response cycle against a session.

use std::time::SystemTime;

use futures_util::future::{AbortRegistration, Abortable};
use tokio::sync::mpsc;

use colloquy_context::{ModelLimitsSource, ModelRegistry, Session, SessionStore, Tokenizer};
use colloquy_providers::{GenerationBackend, GenerationRequest};
use colloquy_types::{CompletionSettings, Role, SessionId, StreamEvent};

use crate::errors::CompletionError;

const PREMATURE_CLOSE: &str = "connection closed before stream completed";

/// Input to [`CompletionDriver::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// `None`, or an id the store does not know, opens a new session.
    pub session_id: Option<SessionId>,
    pub owner_id: String,
    pub user_text: String,
    /// Only consulted when a new session is opened.
    pub settings: CompletionSettings,
}

/// Accumulated assistant text after one more fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub session_id: SessionId,
    pub owner_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutput {
    pub session_id: SessionId,
    pub owner_id: String,
    pub content: String,
}

/// Forwards snapshots until the consumer goes away, then drops them.
struct SnapshotSink {
    tx: mpsc::Sender<Snapshot>,
    closed: bool,
}

impl SnapshotSink {
    fn new(tx: mpsc::Sender<Snapshot>) -> Self {
        Self { tx, closed: false }
    }

    async fn publish(&mut self, snapshot: Snapshot) {
        if self.closed {
            return;
        }
        if self.tx.send(snapshot).await.is_err() {
            tracing::warn!("Snapshot receiver dropped; continuing without publishing");
            self.closed = true;
        }
    }
}

/// Drives completions for sessions held in `S`, generated by `B`, with
/// message sizes measured by `T`.
///
/// The driver holds no per-session state. Each call loads its own working
/// copy of the session and only writes it back after the reply is complete,
/// so concurrent calls for one session must be serialized by the caller.
pub struct CompletionDriver<S, B, T> {
    store: S,
    backend: B,
    tokenizer: T,
    registry: ModelRegistry,
}

impl<S, B, T> CompletionDriver<S, B, T>
where
    S: SessionStore,
    B: GenerationBackend,
    T: Tokenizer,
{
    pub fn new(store: S, backend: B, tokenizer: T) -> Self {
        Self {
            store,
            backend,
            tokenizer,
            registry: ModelRegistry::default(),
        }
    }

    /// Budgets for sessions whose settings leave them unset.
    #[must_use]
    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Append the user's turn, stream the reply into `snapshots`, then commit
    /// the assistant turn and save the session.
    ///
    /// Aborting the handle paired with `cancel` drops the backend stream and
    /// returns [`CompletionError::Cancelled`]. `snapshots` is dropped before
    /// this returns, which closes the channel for the consumer.
    pub async fn execute(
        &self,
        request: CompletionRequest,
        snapshots: mpsc::Sender<Snapshot>,
        cancel: AbortRegistration,
    ) -> Result<CompletionOutput, CompletionError> {
        match Abortable::new(self.run(request, snapshots), cancel).await {
            Ok(result) => result,
            Err(_aborted) => {
                tracing::info!("Completion cancelled");
                Err(CompletionError::Cancelled)
            }
        }
    }

    /// End a session so later completions are rejected. Ending twice is a no-op.
    pub fn end_session(&self, id: &SessionId, owner_id: &str) -> Result<(), CompletionError> {
        let mut session = self.store.find_by_id(id)?;
        if !session.is_owned_by(owner_id) {
            return Err(CompletionError::InvalidOwner);
        }
        if session.is_ended() {
            return Ok(());
        }
        session.end();
        self.store.save(&session)?;
        Ok(())
    }

    async fn run(
        &self,
        request: CompletionRequest,
        snapshots: mpsc::Sender<Snapshot>,
    ) -> Result<CompletionOutput, CompletionError> {
        let CompletionRequest {
            session_id,
            owner_id,
            user_text,
            settings,
        } = request;

        let mut session = self.resolve(session_id, &owner_id, &settings)?;
        let id = session.id();

        let evicted = session.append_user_turn(&user_text, &self.tokenizer, SystemTime::now())?;
        if evicted > 0 {
            tracing::debug!(session_id = %id, evicted, "User turn evicted history");
        }

        let generation = GenerationRequest {
            model: session.config().model().name().to_string(),
            turns: session.active_turns(),
            params: session.config().params().clone(),
        };
        tracing::debug!(
            session_id = %id,
            model = %generation.model,
            turns = generation.turns.len(),
            token_usage = session.buffer().token_usage(),
            "Requesting completion"
        );

        let mut stream = self.backend.stream_complete(generation).await?;
        let mut sink = SnapshotSink::new(snapshots);
        let mut content = String::new();
        loop {
            match stream.next().await {
                Some(StreamEvent::TextDelta(delta)) => {
                    content.push_str(&delta);
                    sink.publish(Snapshot {
                        session_id: id,
                        owner_id: session.owner_id().to_string(),
                        content: content.clone(),
                    })
                    .await;
                }
                Some(StreamEvent::Done) => break,
                Some(StreamEvent::Error(message)) => {
                    tracing::warn!(session_id = %id, "Completion stream failed: {message}");
                    return Err(CompletionError::BackendFailure(message));
                }
                None => {
                    tracing::warn!(session_id = %id, "Completion stream closed without end marker");
                    return Err(CompletionError::BackendFailure(PREMATURE_CLOSE.to_string()));
                }
            }
        }
        drop(stream);

        let evicted =
            session.append_assistant_turn(&content, &self.tokenizer, SystemTime::now())?;
        self.store.save(&session)?;

        tracing::info!(
            session_id = %id,
            evicted,
            token_usage = session.buffer().token_usage(),
            "Completion committed"
        );
        Ok(CompletionOutput {
            session_id: id,
            owner_id: session.owner_id().to_string(),
            content,
        })
    }

    /// Load the session, or open and persist a new one when there is none.
    fn resolve(
        &self,
        session_id: Option<SessionId>,
        owner_id: &str,
        settings: &CompletionSettings,
    ) -> Result<Session, CompletionError> {
        if let Some(id) = session_id {
            match self.store.find_by_id(&id) {
                Ok(session) if session.is_owned_by(owner_id) => return Ok(session),
                Ok(_) => {
                    tracing::warn!(session_id = %id, "Rejected completion for another owner's session");
                    return Err(CompletionError::InvalidOwner);
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(session_id = %id, "Unknown session; opening a new one");
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.open_session(owner_id, settings)
    }

    fn open_session(
        &self,
        owner_id: &str,
        settings: &CompletionSettings,
    ) -> Result<Session, CompletionError> {
        if settings.model_max_tokens.is_none()
            && self.registry.get(&settings.model).source() == ModelLimitsSource::DefaultFallback
        {
            tracing::warn!(model = %settings.model, "Unknown model; using default token budget");
        }
        let config = self.registry.session_config(settings)?;
        self.backend.check_params(config.params())?;
        let system = self.tokenizer.message(
            Role::System,
            &settings.initial_system_message,
            config.model(),
            SystemTime::now(),
        );
        let session = Session::create(owner_id, system, config)?;
        self.store.create(&session)?;
        tracing::info!(
            session_id = %session.id(),
            model = %session.config().model().name(),
            budget = session.config().model().max_tokens(),
            "Opened session"
        );
        Ok(session)
    }
}
