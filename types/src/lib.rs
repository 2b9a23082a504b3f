//! Core domain types for Colloquy.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the workspace.

#![allow(clippy::missing_errors_doc)]

mod ids;
mod message;
mod model;
mod proofs;
mod session;
mod settings;
pub mod text;

pub use ids::{MessageId, SessionId};
pub use message::{Message, Role, StreamEvent, Turn};
pub use model::{EnumKind, EnumParseError, ModelDescriptor};
pub use proofs::{EmptyStringError, NonEmptyString};
pub use session::SessionStatus;
pub use settings::{
    CompletionSettings, ConfigurationError, DEFAULT_MODEL, DEFAULT_SYSTEM_MESSAGE,
    GenerationParams, RawGenerationParams, SessionConfig,
};
