//! Model descriptors and closed-enum parsing support.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::proofs::NonEmptyString;
use crate::settings::ConfigurationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumKind {
    Role,
    SessionStatus,
}

impl EnumKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EnumKind::Role => "role",
            EnumKind::SessionStatus => "session status",
        }
    }
}

impl fmt::Display for EnumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} value '{raw}'; expected one of: {expected:?}")]
pub struct EnumParseError {
    kind: EnumKind,
    raw: String,
    expected: &'static [&'static str],
}

impl EnumParseError {
    #[must_use]
    pub fn new(kind: EnumKind, raw: impl Into<String>, expected: &'static [&'static str]) -> Self {
        Self {
            kind,
            raw: raw.into(),
            expected,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EnumKind {
        self.kind
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub const fn expected(&self) -> &'static [&'static str] {
        self.expected
    }
}

#[derive(Deserialize)]
struct RawModelDescriptor {
    name: String,
    max_tokens: u32,
}

/// A generation model and the token budget of its context window.
///
/// Invariant: the name is non-empty and the budget is positive. Both are
/// checked at construction, so a descriptor in hand is always usable as a
/// buffer ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawModelDescriptor")]
pub struct ModelDescriptor {
    name: NonEmptyString,
    max_tokens: u32,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, max_tokens: u32) -> Result<Self, ConfigurationError> {
        let name = NonEmptyString::new(name).map_err(|_| ConfigurationError::EmptyModelName)?;
        if max_tokens == 0 {
            return Err(ConfigurationError::ZeroContextBudget);
        }
        Ok(Self { name, max_tokens })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub const fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

impl TryFrom<RawModelDescriptor> for ModelDescriptor {
    type Error = ConfigurationError;

    fn try_from(raw: RawModelDescriptor) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.max_tokens)
    }
}

impl fmt::Display for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} tokens)", self.name, self.max_tokens)
    }
}
