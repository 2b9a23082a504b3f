//! Session persistence boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use colloquy_types::SessionId;
use thiserror::Error;

use crate::session::Session;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("session {0} already exists")]
    AlreadyExists(SessionId),
    #[error("session {id} is corrupt: {reason}")]
    Corrupt { id: SessionId, reason: String },
    #[error("session store lock poisoned")]
    Poisoned,
    #[error("database error: {0:#}")]
    Database(anyhow::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Database(err)
    }
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Durable home for sessions.
///
/// `save` replaces the full state (status, active window, evicted history and
/// usage) for the session id. It is an upsert, never an incremental patch.
pub trait SessionStore: Send + Sync {
    fn create(&self, session: &Session) -> Result<(), StoreError>;
    fn find_by_id(&self, id: &SessionId) -> Result<Session, StoreError>;
    fn save(&self, session: &Session) -> Result<(), StoreError>;
}

impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    fn create(&self, session: &Session) -> Result<(), StoreError> {
        (**self).create(session)
    }

    fn find_by_id(&self, id: &SessionId) -> Result<Session, StoreError> {
        (**self).find_by_id(id)
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        (**self).save(session)
    }
}

/// Process-local store. Lookups hand out clones, so callers always work on
/// a private copy until they `save`.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.sessions.lock().map_err(|_| StoreError::Poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned)?;
        if sessions.contains_key(&session.id()) {
            return Err(StoreError::AlreadyExists(session.id()));
        }
        sessions.insert(session.id(), session.clone());
        Ok(())
    }

    fn find_by_id(&self, id: &SessionId) -> Result<Session, StoreError> {
        let sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned)?;
        sessions.get(id).cloned().ok_or(StoreError::NotFound(*id))
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned)?;
        sessions.insert(session.id(), session.clone());
        Ok(())
    }
}
