//! Model token limits and registry.
//!
//! [`ModelLimits`] stores the context window and output ceiling for a model;
//! [`ModelRegistry`] resolves them by name with prefix matching so dated
//! snapshots (`gpt-4o-2024-08-06`) inherit their family's limits.

use std::collections::HashMap;

use colloquy_types::{CompletionSettings, ConfigurationError, SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    /// Maximum context window in tokens. Used as the conversation budget.
    context_window: u32,
    /// Maximum output tokens the model can generate.
    max_output: u32,
}

impl ModelLimits {
    #[must_use]
    pub const fn new(context_window: u32, max_output: u32) -> Self {
        Self {
            context_window,
            max_output,
        }
    }

    #[must_use]
    pub const fn context_window(&self) -> u32 {
        self.context_window
    }

    #[must_use]
    pub const fn max_output(&self) -> u32 {
        self.max_output
    }
}

/// Where model limits came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelLimitsSource {
    /// Exact match from an override.
    Override,
    /// Matched a known prefix (the matched prefix).
    Prefix(&'static str),
    /// Fell back to `DEFAULT_LIMITS` because no match was found.
    DefaultFallback,
}

/// Result of looking up model limits.
///
/// This makes the "fallback OR real data" decision explicit at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedModelLimits {
    limits: ModelLimits,
    source: ModelLimitsSource,
}

impl ResolvedModelLimits {
    #[must_use]
    pub const fn new(limits: ModelLimits, source: ModelLimitsSource) -> Self {
        Self { limits, source }
    }

    #[must_use]
    pub const fn limits(self) -> ModelLimits {
        self.limits
    }

    #[must_use]
    pub const fn source(self) -> ModelLimitsSource {
        self.source
    }
}

/// Default fallback limits for unknown models.
pub const DEFAULT_LIMITS: ModelLimits = ModelLimits::new(8192, 4096);

/// Known model prefixes and their limits.
///
/// Ordered by specificity: `gpt-4o` and `gpt-4.1` must precede `gpt-4`.
const KNOWN_MODELS: &[(&str, ModelLimits)] = &[
    ("gpt-4o-mini", ModelLimits::new(128_000, 16_384)),
    ("gpt-4o", ModelLimits::new(128_000, 16_384)),
    ("gpt-4.1", ModelLimits::new(1_047_576, 32_768)),
    ("gpt-4-turbo", ModelLimits::new(128_000, 4096)),
    ("gpt-4-32k", ModelLimits::new(32_768, 4096)),
    ("gpt-4", ModelLimits::new(8192, 4096)),
    ("gpt-3.5-turbo", ModelLimits::new(16_385, 4096)),
];

/// Registry of known model limits with support for custom overrides.
///
/// Lookup order: exact-match override, then known prefix, then
/// [`DEFAULT_LIMITS`] tagged as [`ModelLimitsSource::DefaultFallback`].
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    overrides: HashMap<String, ModelLimits>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, model: &str) -> ResolvedModelLimits {
        let model = model.trim();
        if let Some(limits) = self.overrides.get(model) {
            return ResolvedModelLimits::new(*limits, ModelLimitsSource::Override);
        }

        for (prefix, limits) in KNOWN_MODELS {
            if model.starts_with(prefix) {
                return ResolvedModelLimits::new(*limits, ModelLimitsSource::Prefix(prefix));
            }
        }

        ResolvedModelLimits::new(DEFAULT_LIMITS, ModelLimitsSource::DefaultFallback)
    }

    /// Overrides take precedence over prefix matching for exact matches.
    pub fn set_override(&mut self, model: impl Into<String>, limits: ModelLimits) {
        self.overrides.insert(model.into(), limits);
    }

    #[must_use]
    pub fn with_override(mut self, model: impl Into<String>, limits: ModelLimits) -> Self {
        self.set_override(model, limits);
        self
    }

    #[must_use]
    pub fn has_override(&self, model: &str) -> bool {
        self.overrides.contains_key(model)
    }

    /// Validate caller settings, filling unset budgets from this registry.
    pub fn session_config(
        &self,
        settings: &CompletionSettings,
    ) -> Result<SessionConfig, ConfigurationError> {
        let limits = self.get(&settings.model).limits();
        settings.session_config(limits.context_window(), limits.max_output())
    }
}
