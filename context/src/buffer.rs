//! Token-budgeted conversation window.
//!
//! The active window holds the messages sent to the model; everything pushed
//! out of it moves (not copies) to the evicted history, oldest first.

use colloquy_types::{ConfigurationError, Message, SessionConfig};
use thiserror::Error;

/// Reasons a persisted buffer cannot be rehydrated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestoreError {
    #[error("active window is empty")]
    EmptyActive,
    #[error("token budget is zero")]
    ZeroBudget,
    #[error("active window uses {usage} tokens across {len} messages, over the budget of {budget}")]
    OverBudget { usage: u64, len: usize, budget: u32 },
}

/// Ordered active window plus evicted history with running token usage.
///
/// Invariants, after every mutation:
/// - `token_usage == sum(active[i].token_count())`
/// - `token_usage <= max_tokens`, or `active` holds a single message that is
///   larger than the budget on its own
/// - `active` is never empty
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationBuffer {
    active: Vec<Message>,
    evicted: Vec<Message>,
    token_usage: u64,
    max_tokens: u32,
}

impl ConversationBuffer {
    pub fn new(initial: Message, config: &SessionConfig) -> Result<Self, ConfigurationError> {
        let max_tokens = config.model().max_tokens();
        if max_tokens == 0 {
            return Err(ConfigurationError::ZeroContextBudget);
        }
        if initial.token_count() > max_tokens {
            return Err(ConfigurationError::InitialMessageOverBudget {
                tokens: initial.token_count(),
                budget: max_tokens,
            });
        }
        Ok(Self {
            token_usage: u64::from(initial.token_count()),
            active: vec![initial],
            evicted: Vec::new(),
            max_tokens,
        })
    }

    /// Rebuild a buffer from persisted state. Usage is recomputed from `active`.
    pub fn restore(
        active: Vec<Message>,
        evicted: Vec<Message>,
        max_tokens: u32,
    ) -> Result<Self, RestoreError> {
        if max_tokens == 0 {
            return Err(RestoreError::ZeroBudget);
        }
        if active.is_empty() {
            return Err(RestoreError::EmptyActive);
        }
        let token_usage = sum_tokens(&active);
        if active.len() > 1 && token_usage > u64::from(max_tokens) {
            return Err(RestoreError::OverBudget {
                usage: token_usage,
                len: active.len(),
                budget: max_tokens,
            });
        }
        Ok(Self {
            active,
            evicted,
            token_usage,
            max_tokens,
        })
    }

    /// Push `message` and evict from the front until the window fits.
    ///
    /// Never evicts the message just appended, so an oversized message ends
    /// up alone in the window. Returns how many messages were evicted.
    pub fn append(&mut self, message: Message) -> usize {
        self.token_usage += u64::from(message.token_count());
        self.active.push(message);

        let budget = u64::from(self.max_tokens);
        let mut usage = self.token_usage;
        let mut count = 0;
        while usage > budget && self.active.len() - count > 1 {
            usage -= u64::from(self.active[count].token_count());
            count += 1;
        }

        if count > 0 {
            self.evicted.extend(self.active.drain(..count));
            self.token_usage = usage;
        }
        count
    }

    #[must_use]
    pub fn active(&self) -> &[Message] {
        &self.active
    }

    #[must_use]
    pub fn evicted(&self) -> &[Message] {
        &self.evicted
    }

    #[must_use]
    pub const fn token_usage(&self) -> u64 {
        self.token_usage
    }

    #[must_use]
    pub const fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Number of messages in the active window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Always `false` for a constructed buffer; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

fn sum_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(|m| u64::from(m.token_count())).sum()
}
