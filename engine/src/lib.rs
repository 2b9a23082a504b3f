//! Completion orchestration for Colloquy.
//!
//! [`CompletionDriver::execute`] runs one user turn end to end:
//!
//! 1. load the session, or open and persist a new one
//! 2. append the user message (may evict the oldest turns)
//! 3. stream the backend reply, publishing a [`Snapshot`] per fragment
//! 4. append the assistant message and save the session
//!
//! Nothing is saved unless step 3 reaches its end marker.

mod driver;
mod errors;
mod init;

pub use driver::{CompletionDriver, CompletionOutput, CompletionRequest, Snapshot};
pub use errors::CompletionError;
pub use init::{ConfiguredDriver, driver_from_config, registry_from_config};

pub use colloquy_config::{self, ColloquyConfig, ConfigError};
pub use colloquy_context::{
    self, InMemorySessionStore, ModelRegistry, Session, SessionStore, SqliteSessionStore,
    StoreError, TokenCounter, Tokenizer,
};
pub use colloquy_providers::{
    self, BackendError, FragmentStream, GenerationBackend, GenerationRequest,
};
pub use colloquy_types::{self, CompletionSettings, Role, SessionId, StreamEvent};
