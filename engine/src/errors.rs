use thiserror::Error;

use colloquy_context::{SessionError, StoreError};
use colloquy_providers::BackendError;
use colloquy_types::{ConfigurationError, SessionId};

/// Why a completion did not commit.
///
/// Every variant leaves the persisted session as it was before the call.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigurationError),
    #[error("owner id is empty or does not match the session")]
    InvalidOwner,
    #[error("session {0} has ended")]
    SessionEnded(SessionId),
    #[error("session store failure: {0}")]
    PersistenceFailure(#[from] StoreError),
    #[error("generation backend failure: {0}")]
    BackendFailure(String),
    #[error("completion cancelled")]
    Cancelled,
}

impl From<SessionError> for CompletionError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidConfiguration(e) => Self::InvalidConfiguration(e),
            SessionError::InvalidOwner => Self::InvalidOwner,
            SessionError::SessionEnded(id) => Self::SessionEnded(id),
        }
    }
}

impl From<BackendError> for CompletionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidRequest(e) => Self::InvalidConfiguration(e),
            other => Self::BackendFailure(other.to_string()),
        }
    }
}
