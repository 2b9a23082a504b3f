//! Token counting using tiktoken.
//!
//! Counts are exact for OpenAI chat models that share the selected encoding
//! and approximate for everything else. Unknown models use `o200k_base`.
//! When an encoder fails to load, counting falls back to byte length, which
//! over-estimates and therefore errs toward evicting early.

use std::sync::OnceLock;
use std::time::SystemTime;

use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

use colloquy_types::{Message, ModelDescriptor, Role};

/// Pure text + model -> token count capability.
///
/// Implementations must be deterministic: the same text and model always
/// produce the same count, because the count is recorded once on each
/// message and never recomputed.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str, model: &str) -> u32;

    /// Build a message whose token count is measured against `model`.
    fn message(
        &self,
        role: Role,
        content: &str,
        model: &ModelDescriptor,
        created_at: SystemTime,
    ) -> Message {
        let tokens = self.count(content, model.name());
        Message::new(role, content, tokens, created_at)
    }
}

impl<F> Tokenizer for F
where
    F: Fn(&str, &str) -> u32 + Send + Sync,
{
    fn count(&self, text: &str, model: &str) -> u32 {
        self(text, model)
    }
}

/// BPE vocabularies are expensive to load, so each is built once per process.
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    O200k,
    Cl100k,
}

impl Encoding {
    fn for_model(model: &str) -> Self {
        let model = model.trim().to_ascii_lowercase();
        let legacy_gpt4 = model.starts_with("gpt-4")
            && !model.starts_with("gpt-4o")
            && !model.starts_with("gpt-4.");
        if legacy_gpt4 || model.starts_with("gpt-3.5") {
            Encoding::Cl100k
        } else {
            Encoding::O200k
        }
    }

    fn encoder(self) -> Option<&'static CoreBPE> {
        let cell = match self {
            Encoding::O200k => &O200K,
            Encoding::Cl100k => &CL100K,
        };
        cell.get_or_init(|| {
            let loaded = match self {
                Encoding::O200k => o200k_base(),
                Encoding::Cl100k => cl100k_base(),
            };
            match loaded {
                Ok(bpe) => Some(bpe),
                Err(err) => {
                    tracing::error!(
                        encoding = ?self,
                        "Failed to initialize tiktoken encoder ({err}). Falling back to byte-length estimates."
                    );
                    None
                }
            }
        })
        .as_ref()
    }
}

/// Thread-safe token counter backed by shared tiktoken encoders.
///
/// # Example
///
/// ```
/// use colloquy_context::{TokenCounter, Tokenizer};
///
/// let counter = TokenCounter::new();
/// let tokens = counter.count("Hello, world!", "gpt-4o");
/// assert!(tokens > 0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Tokenizer for TokenCounter {
    fn count(&self, text: &str, model: &str) -> u32 {
        let len = match Encoding::for_model(model).encoder() {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.len(),
        };
        u32::try_from(len).unwrap_or(u32::MAX)
    }
}
