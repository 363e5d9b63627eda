//! Error types for the financial advice orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Request / Pipeline Errors
    // =============================

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Data access error: {0}")]
    DataAccess(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Expert output error: {0}")]
    ExpertOutput(String),

    #[error("Stream error: {0}")]
    Stream(String),

    /// Client closed the connection. A control signal, never reported.
    #[error("Client disconnected")]
    ClientGone,

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Whether this error ends a run with a terminal error event.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            OrchestrationError::ClientGone | OrchestrationError::ExpertOutput(_)
        )
    }

    /// Short message safe to put on the wire.
    pub fn client_message(&self) -> String {
        match self {
            OrchestrationError::DataAccess(_) => {
                "We couldn't load your financial data right now.".to_string()
            }
            OrchestrationError::Classification(_) => {
                "We couldn't understand the question well enough to answer it.".to_string()
            }
            OrchestrationError::Stream(_) => {
                "The answer stream was interrupted.".to_string()
            }
            OrchestrationError::Validation(msg) => msg.clone(),
            _ => "Something went wrong while preparing your answer.".to_string(),
        }
    }
}
