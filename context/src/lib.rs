//! Token-budgeted conversation state and its persistence.
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── config: SessionConfig (model descriptor + generation params)
//! └── buffer: ConversationBuffer (active window + evicted history)
//!
//! Tokenizer (trait) ── TokenCounter (tiktoken)
//! ModelRegistry ── default budgets per model family
//! SessionStore (trait)
//! ├── InMemorySessionStore
//! └── SqliteSessionStore
//! ```

mod buffer;
mod model_limits;
mod session;
mod sqlite_store;
mod sqlite_util;
mod store;
mod token_counter;

pub use buffer::{ConversationBuffer, RestoreError};
pub use model_limits::{
    DEFAULT_LIMITS, ModelLimits, ModelLimitsSource, ModelRegistry, ResolvedModelLimits,
};
pub use session::{Session, SessionError};
pub use sqlite_store::SqliteSessionStore;
pub use store::{InMemorySessionStore, SessionStore, StoreError};
pub use token_counter::{TokenCounter, Tokenizer};
