//! A conversation session: buffer plus identity, owner, config and lifecycle.

use std::time::SystemTime;

use colloquy_types::{
    ConfigurationError, Message, NonEmptyString, Role, SessionConfig, SessionId, SessionStatus,
    Turn,
};
use thiserror::Error;

use crate::buffer::{ConversationBuffer, RestoreError};
use crate::token_counter::Tokenizer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigurationError),
    #[error("owner id must not be empty")]
    InvalidOwner,
    #[error("session {0} has ended")]
    SessionEnded(SessionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: SessionId,
    owner_id: NonEmptyString,
    status: SessionStatus,
    config: SessionConfig,
    buffer: ConversationBuffer,
}

impl Session {
    /// Open a new active session seeded with a system message.
    pub fn create(
        owner_id: &str,
        initial_system_message: Message,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let owner_id = NonEmptyString::new(owner_id).map_err(|_| SessionError::InvalidOwner)?;
        if initial_system_message.role() != Role::System {
            return Err(ConfigurationError::InitialMessageNotSystem.into());
        }
        let buffer = ConversationBuffer::new(initial_system_message, &config)?;
        Ok(Self {
            id: SessionId::generate(),
            owner_id,
            status: SessionStatus::Active,
            config,
            buffer,
        })
    }

    /// Rehydrate a persisted session. The buffer budget comes from `config`.
    pub fn restore(
        id: SessionId,
        owner_id: NonEmptyString,
        status: SessionStatus,
        config: SessionConfig,
        active: Vec<Message>,
        evicted: Vec<Message>,
    ) -> Result<Self, RestoreError> {
        let buffer = ConversationBuffer::restore(active, evicted, config.model().max_tokens())?;
        Ok(Self {
            id,
            owner_id,
            status,
            config,
            buffer,
        })
    }

    /// Idempotent: ending an ended session is a no-op.
    pub fn end(&mut self) {
        if self.status == SessionStatus::Ended {
            return;
        }
        self.status = SessionStatus::Ended;
        tracing::info!(session_id = %self.id, "Session ended");
    }

    pub fn append(&mut self, message: Message) -> Result<usize, SessionError> {
        self.ensure_active()?;
        Ok(self.push(message))
    }

    pub fn append_user_turn<T>(
        &mut self,
        content: &str,
        tokenizer: &T,
        created_at: SystemTime,
    ) -> Result<usize, SessionError>
    where
        T: Tokenizer + ?Sized,
    {
        self.append_turn(Role::User, content, tokenizer, created_at)
    }

    pub fn append_assistant_turn<T>(
        &mut self,
        content: &str,
        tokenizer: &T,
        created_at: SystemTime,
    ) -> Result<usize, SessionError>
    where
        T: Tokenizer + ?Sized,
    {
        self.append_turn(Role::Assistant, content, tokenizer, created_at)
    }

    fn append_turn<T>(
        &mut self,
        role: Role,
        content: &str,
        tokenizer: &T,
        created_at: SystemTime,
    ) -> Result<usize, SessionError>
    where
        T: Tokenizer + ?Sized,
    {
        self.ensure_active()?;
        let message = tokenizer.message(role, content, self.config.model(), created_at);
        Ok(self.push(message))
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Ended => Err(SessionError::SessionEnded(self.id)),
        }
    }

    fn push(&mut self, message: Message) -> usize {
        let role = message.role();
        let tokens = message.token_count();
        let evicted = self.buffer.append(message);
        tracing::debug!(
            session_id = %self.id,
            %role,
            tokens,
            evicted,
            usage = self.buffer.token_usage(),
            budget = self.buffer.max_tokens(),
            "Appended message"
        );
        evicted
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn owner_id(&self) -> &str {
        self.owner_id.as_str()
    }

    #[must_use]
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id.as_str() == owner_id
    }

    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn buffer(&self) -> &ConversationBuffer {
        &self.buffer
    }

    /// Role/content pairs of the active window, oldest first.
    #[must_use]
    pub fn active_turns(&self) -> Vec<Turn> {
        self.buffer.active().iter().map(Message::to_turn).collect()
    }

    /// The oldest message ever recorded, which is the seed system message.
    ///
    /// Still available after eviction pushed it out of the active window.
    #[must_use]
    pub fn initial_system_message(&self) -> Option<&Message> {
        self.buffer
            .evicted()
            .first()
            .or_else(|| self.buffer.active().first())
    }
}
