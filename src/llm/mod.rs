//! Language-model completion capability
//!
//! The pipeline only needs two things from a model: a schema-conformant JSON
//! answer, or a lazy stream of text fragments. Both sit behind
//! [`CompletionClient`] so the orchestrator never sees a concrete vendor.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

pub mod gemini;
pub mod scripted;
pub mod sse;

pub use gemini::GeminiClient;
pub use scripted::ScriptedCompletionClient;

/// One structured-output request.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// Caller label used for logging and call tracking (`classifier`, `expert:debt_strategist`).
    pub label: String,
    pub system_instruction: String,
    pub user_payload: String,
    /// JSON schema the answer must conform to.
    pub schema: serde_json::Value,
    pub timeout: Option<Duration>,
}

/// One free-text streaming request.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub label: String,
    pub system_instruction: String,
    pub user_payload: String,
}

/// A piece of streamed answer text, or the explicit end-of-stream marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerFragment {
    Text(String),
    End { finish_reason: Option<String> },
}

/// Finite, forward-only stream of answer fragments. Not restartable.
pub type AnswerStream = Pin<Box<dyn Stream<Item = crate::Result<AnswerFragment>> + Send>>;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Issue a structured-output request and return the raw JSON text.
    async fn complete_json(&self, request: &StructuredRequest) -> crate::Result<String>;

    /// Start a streamed completion.
    async fn stream_text(&self, request: &TextRequest) -> crate::Result<AnswerStream>;
}

/// Strip a markdown code fence around a JSON body, if any.
pub fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();

    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);

    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}
