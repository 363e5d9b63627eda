//! Expert Executor
//!
//! Runs each selected expert as one structured-output request. Experts are
//! independent; they run with bounded concurrency and the join waits for all
//! of them. A failing expert degrades into a placeholder result instead of
//! failing the batch.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::ExpertKind;
use crate::error::OrchestrationError;
use crate::llm::{strip_json_fence, CompletionClient, StructuredRequest};
use crate::models::{Classification, ExpertResult, FinancialSnapshot};
use crate::router::ExpertSelection;
use crate::Result;

const DEGRADED_NOTE: &str = "This part of the analysis is unavailable: the model returned invalid output";

/// Receives per-expert lifecycle notifications.
#[async_trait]
pub trait ExpertObserver: Send + Sync {
    async fn expert_started(&self, kind: ExpertKind);
    async fn expert_finished(&self, result: &ExpertResult);
}

pub struct ExpertExecutor {
    client: Arc<dyn CompletionClient>,
    concurrency: usize,
    timeout: Option<Duration>,
}

impl ExpertExecutor {
    pub fn new(client: Arc<dyn CompletionClient>, concurrency: usize, timeout: Option<Duration>) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// Run one expert. Never fails: unusable output becomes a degraded result.
    pub async fn run_expert(
        &self,
        kind: ExpertKind,
        question: &str,
        classification: &Classification,
        snapshot: &FinancialSnapshot,
    ) -> ExpertResult {
        let start = Instant::now();

        match self.try_run_expert(kind, question, classification, snapshot).await {
            Ok(data) => {
                info!(
                    expert = %kind,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Expert completed"
                );
                ExpertResult {
                    expert_id: kind,
                    data,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(
                    expert = %kind,
                    error = %e,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Expert output unusable, degrading"
                );
                degraded_result(kind)
            }
        }
    }

    /// Run every selected expert and return results in selection order.
    pub async fn run_all(
        &self,
        selection: &ExpertSelection,
        question: &str,
        classification: &Classification,
        snapshot: &FinancialSnapshot,
        observer: &dyn ExpertObserver,
    ) -> Vec<ExpertResult> {
        debug!(
            experts = selection.len(),
            concurrency = self.concurrency,
            "Running experts"
        );

        futures::stream::iter(selection.experts().iter().copied())
            .map(|kind| async move {
                observer.expert_started(kind).await;
                let result = self
                    .run_expert(kind, question, classification, snapshot)
                    .await;
                observer.expert_finished(&result).await;
                result
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn try_run_expert(
        &self,
        kind: ExpertKind,
        question: &str,
        classification: &Classification,
        snapshot: &FinancialSnapshot,
    ) -> Result<Value> {
        let spec = kind.spec();
        let schema = spec.json_schema().ok_or_else(|| {
            OrchestrationError::ExpertOutput(format!("{} is a free-text role", kind))
        })?;

        let request = StructuredRequest {
            label: format!("expert:{}", kind),
            system_instruction: spec.system_instruction(),
            user_payload: expert_payload(question, classification, snapshot)?,
            schema,
            timeout: self.timeout,
        };

        let call = self.client.complete_json(&request);
        let raw = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                OrchestrationError::ExpertOutput(format!("{} timed out", kind))
            })??,
            None => call.await?,
        };

        let data: Value = serde_json::from_str(strip_json_fence(&raw))
            .map_err(|e| OrchestrationError::ExpertOutput(format!("{}: {}", kind, e)))?;

        spec.conform(&data)
            .map_err(|e| OrchestrationError::ExpertOutput(format!("{}: {}", kind, e)))?;

        Ok(data)
    }
}

/// Question, classification and full snapshot, serialized for an expert.
pub fn expert_payload(
    question: &str,
    classification: &Classification,
    snapshot: &FinancialSnapshot,
) -> Result<String> {
    Ok(serde_json::to_string(&json!({
        "question": question,
        "classification": classification,
        "snapshot": snapshot,
    }))?)
}

pub fn degraded_result(kind: ExpertKind) -> ExpertResult {
    ExpertResult {
        expert_id: kind,
        data: kind.spec().degraded_data(DEGRADED_NOTE),
        degraded: true,
    }
}
