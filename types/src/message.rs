//! Core message domain model.
//!
//! Constructors take `SystemTime` explicitly; callers own the clock.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::model::{EnumKind, EnumParseError};

const ROLE_VALUES: &[&str] = &["system", "user", "assistant"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, EnumParseError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(EnumParseError::new(EnumKind::Role, raw.trim(), ROLE_VALUES)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded turn of a conversation.
///
/// The token count is fixed when the message is built and never recomputed,
/// even if the message later moves between the active window and the
/// evicted history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    role: Role,
    content: String,
    token_count: u32,
    created_at: SystemTime,
}

impl Message {
    #[must_use]
    pub fn new(
        role: Role,
        content: impl Into<String>,
        token_count: u32,
        created_at: SystemTime,
    ) -> Self {
        Self::restore(
            MessageId::generate(),
            role,
            content,
            token_count,
            created_at,
        )
    }

    /// Rebuild a message that already has an identity (e.g. loaded from a store).
    #[must_use]
    pub fn restore(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        token_count: u32,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            token_count,
            created_at,
        }
    }

    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub const fn token_count(&self) -> u32 {
        self.token_count
    }

    #[must_use]
    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    #[must_use]
    pub fn to_turn(&self) -> Turn {
        Turn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Role/content pair handed to a generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Events yielded by a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text fragment.
    TextDelta(String),
    /// Graceful end of the stream.
    Done,
    /// The stream failed; no further events follow.
    Error(String),
}

impl StreamEvent {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }
}
