//! Validated generation settings shared across crates.
//!
//! `CompletionSettings` is the caller-facing record (all fields defaulted,
//! nothing checked). Converting it into a [`SessionConfig`] is the parse
//! boundary: the result proves every parameter was validated.

use serde::{Deserialize, Serialize};

use crate::model::ModelDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("model name must not be empty")]
    EmptyModelName,
    #[error("model token budget must be greater than zero")]
    ZeroContextBudget,
    #[error("candidate count must be at least 1")]
    ZeroCandidateCount,
    #[error("max output tokens must be greater than zero")]
    ZeroMaxOutputTokens,
    #[error("{name} must be a finite number")]
    NonFiniteParameter { name: &'static str },
    #[error("stop sequence #{index} must not be empty")]
    EmptyStopSequence { index: usize },
    #[error("at most {max} stop sequences are supported, got {count}")]
    TooManyStopSequences { count: usize, max: usize },
    #[error("initial message must have the system role")]
    InitialMessageNotSystem,
    #[error("initial message uses {tokens} tokens, exceeding the budget of {budget}")]
    InitialMessageOverBudget { tokens: u32, budget: u32 },
}

/// Unvalidated generation parameters, as read from a caller or a store row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub candidate_count: u32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
}

/// Sampling parameters forwarded to the generation backend.
///
/// Invariant: floats are finite, `candidate_count >= 1`, `max_output_tokens > 0`
/// and no stop sequence is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGenerationParams", into = "RawGenerationParams")]
pub struct GenerationParams {
    temperature: f32,
    top_p: f32,
    candidate_count: u32,
    stop_sequences: Vec<String>,
    max_output_tokens: u32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

fn finite(value: f32, name: &'static str) -> Result<f32, ConfigurationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigurationError::NonFiniteParameter { name })
    }
}

impl TryFrom<RawGenerationParams> for GenerationParams {
    type Error = ConfigurationError;

    fn try_from(raw: RawGenerationParams) -> Result<Self, Self::Error> {
        if raw.candidate_count == 0 {
            return Err(ConfigurationError::ZeroCandidateCount);
        }
        if raw.max_output_tokens == 0 {
            return Err(ConfigurationError::ZeroMaxOutputTokens);
        }
        if let Some(index) = raw.stop_sequences.iter().position(String::is_empty) {
            return Err(ConfigurationError::EmptyStopSequence { index });
        }
        Ok(Self {
            temperature: finite(raw.temperature, "temperature")?,
            top_p: finite(raw.top_p, "top_p")?,
            candidate_count: raw.candidate_count,
            stop_sequences: raw.stop_sequences,
            max_output_tokens: raw.max_output_tokens,
            presence_penalty: finite(raw.presence_penalty, "presence_penalty")?,
            frequency_penalty: finite(raw.frequency_penalty, "frequency_penalty")?,
        })
    }
}

impl From<GenerationParams> for RawGenerationParams {
    fn from(params: GenerationParams) -> Self {
        Self {
            temperature: params.temperature,
            top_p: params.top_p,
            candidate_count: params.candidate_count,
            stop_sequences: params.stop_sequences,
            max_output_tokens: params.max_output_tokens,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
        }
    }
}

impl GenerationParams {
    #[must_use]
    pub const fn temperature(&self) -> f32 {
        self.temperature
    }

    #[must_use]
    pub const fn top_p(&self) -> f32 {
        self.top_p
    }

    #[must_use]
    pub const fn candidate_count(&self) -> u32 {
        self.candidate_count
    }

    #[must_use]
    pub fn stop_sequences(&self) -> &[String] {
        &self.stop_sequences
    }

    #[must_use]
    pub const fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    #[must_use]
    pub const fn presence_penalty(&self) -> f32 {
        self.presence_penalty
    }

    #[must_use]
    pub const fn frequency_penalty(&self) -> f32 {
        self.frequency_penalty
    }
}

/// Model plus sampling parameters, fixed for a session's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    model: ModelDescriptor,
    params: GenerationParams,
}

impl SessionConfig {
    #[must_use]
    pub fn new(model: ModelDescriptor, params: GenerationParams) -> Self {
        Self { model, params }
    }

    #[must_use]
    pub fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    #[must_use]
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }
}

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

/// Settings used to open a session on first contact.
///
/// Budgets left as `None` are filled in from the model registry by the
/// caller before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub model: String,
    pub model_max_tokens: Option<u32>,
    pub temperature: f32,
    pub top_p: f32,
    pub candidate_count: u32,
    pub stop_sequences: Vec<String>,
    pub max_output_tokens: Option<u32>,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub initial_system_message: String,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            model_max_tokens: None,
            temperature: 1.0,
            top_p: 1.0,
            candidate_count: 1,
            stop_sequences: Vec::new(),
            max_output_tokens: None,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            initial_system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
        }
    }
}

impl CompletionSettings {
    /// Validate into a [`SessionConfig`].
    ///
    /// `default_context_window` and `default_max_output` apply only where the
    /// corresponding field is `None`.
    pub fn session_config(
        &self,
        default_context_window: u32,
        default_max_output: u32,
    ) -> Result<SessionConfig, ConfigurationError> {
        let model = ModelDescriptor::new(
            self.model.trim(),
            self.model_max_tokens.unwrap_or(default_context_window),
        )?;
        let params = GenerationParams::try_from(RawGenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            candidate_count: self.candidate_count,
            stop_sequences: self.stop_sequences.clone(),
            max_output_tokens: self.max_output_tokens.unwrap_or(default_max_output),
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
        })?;
        Ok(SessionConfig::new(model, params))
    }
}
