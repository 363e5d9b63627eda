//! Financial Advice Orchestrator
//!
//! Answers a user's financial question by:
//! - Loading a normalized snapshot of the account
//! - Classifying the question type and the user's emotional state
//! - Routing to a bounded set of specialist experts with strict output schemas
//! - Running the experts concurrently, degrading any that return bad output
//! - Streaming a synthesized answer back over a long-lived SSE connection
//!
//! PIPELINE:
//! SNAPSHOT → CLASSIFY → ROUTE → EXPERTS → SYNTHESIZE → DONE

pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod experts;
pub mod llm;
pub mod models;
pub mod router;
pub mod session;
pub mod snapshot;
pub mod synthesizer;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use agent::{Orchestrator, RunReport, RunState};
pub use config::{AdvisorConfig, PipelinePolicy};
pub use models::*;
pub use session::{SessionChannel, SessionEvent};
