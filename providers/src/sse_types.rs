//! Typed SSE payloads for provider responses.
//!
//! Parse errors happen at the serde boundary, not scattered through parsing
//! logic. Every field is optional or defaulted so unknown or partial chunks
//! still deserialize.

pub mod chat_completions {
    use serde::Deserialize;

    /// One `chat.completion.chunk` payload.
    #[derive(Debug, Default, Deserialize)]
    pub struct Chunk {
        #[serde(default)]
        pub choices: Vec<Choice>,
        /// Present when the server reports an error inside the stream.
        pub error: Option<ErrorInfo>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Choice {
        #[serde(default)]
        pub index: u32,
        #[serde(default)]
        pub delta: Delta,
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct Delta {
        pub role: Option<String>,
        pub content: Option<String>,
        pub refusal: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default)]
        pub message: String,
        #[serde(default, rename = "type")]
        pub error_type: Option<String>,
        #[serde(default)]
        pub code: Option<serde_json::Value>,
    }
}
