//! Answer Synthesizer
//!
//! Turns the expert outputs into one streamed answer. The instruction adapts
//! its tone to the user's emotional state and the payload labels expert
//! output as neutral analysis notes.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::experts::ExpertKind;
use crate::llm::{AnswerStream, CompletionClient, TextRequest};
use crate::models::{Classification, EmotionalState, ExpertResult, FinancialSnapshot};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    ReassuranceFirst,
    PlanFirst,
    NeutralComparative,
}

impl Tone {
    pub fn for_state(state: EmotionalState) -> Self {
        match state {
            EmotionalState::Anxious | EmotionalState::Overwhelmed => Tone::ReassuranceFirst,
            EmotionalState::Motivated => Tone::PlanFirst,
            EmotionalState::Defensive | EmotionalState::Curious | EmotionalState::Calm => {
                Tone::NeutralComparative
            }
        }
    }

    fn guidance(&self) -> &'static str {
        match self {
            Tone::ReassuranceFirst => {
                "Open by acknowledging the worry and pointing to something that is going well. \
                 Only then explain the situation, in small steps, with no alarming language."
            }
            Tone::PlanFirst => {
                "Lead with a concrete, numbered plan the user can start this week, \
                 then explain the reasoning briefly."
            }
            Tone::NeutralComparative => {
                "Stay neutral and factual. Lay out the options side by side with their \
                 trade-offs and let the numbers speak; do not lecture."
            }
        }
    }
}

pub struct Synthesizer {
    client: Arc<dyn CompletionClient>,
}

impl Synthesizer {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    pub async fn synthesize(
        &self,
        snapshot: &FinancialSnapshot,
        question: &str,
        classification: &Classification,
        results: &[ExpertResult],
    ) -> Result<AnswerStream> {
        let request = TextRequest {
            label: "synthesizer".to_string(),
            system_instruction: build_instruction(classification.emotional_state),
            user_payload: build_payload(snapshot, question, classification, results)?,
        };

        debug!(notes = results.len(), "Starting synthesis stream");

        self.client.stream_text(&request).await
    }
}

pub fn build_instruction(state: EmotionalState) -> String {
    format!(
        "{}\n\nTone: {}",
        ExpertKind::Synthesizer.spec().system_instruction(),
        Tone::for_state(state).guidance()
    )
}

/// Notes are labelled by topic only; expert identities stay internal.
fn note_topic(kind: ExpertKind) -> &'static str {
    match kind {
        ExpertKind::FinancialAnalyst => "overall financial picture",
        ExpertKind::BehavioralEconomist => "habits and decision patterns",
        ExpertKind::BehavioralTherapist => "emotional context",
        ExpertKind::DebtStrategist => "debt",
        ExpertKind::TaxOptimizer => "taxes",
        ExpertKind::GoalPlanner => "long-term goals",
        ExpertKind::Synthesizer => "summary",
    }
}

fn build_payload(
    snapshot: &FinancialSnapshot,
    question: &str,
    classification: &Classification,
    results: &[ExpertResult],
) -> Result<String> {
    let notes: Vec<Value> = results
        .iter()
        .map(|r| {
            json!({
                "topic": note_topic(r.expert_id),
                "notes": r.data,
            })
        })
        .collect();

    Ok(serde_json::to_string(&json!({
        "question": question,
        "classification": classification,
        "snapshot": snapshot,
        "analysis_notes": notes,
    }))?)
}
