//! Expert Router
//!
//! Pure mapping from (question, classification, snapshot) to the ordered set
//! of experts to consult. Rules apply in a fixed order; later duplicates are
//! ignored and the cap drops the latest additions first.

use serde::Serialize;

use crate::experts::ExpertKind;
use crate::models::{Classification, FinancialSnapshot};

/// Matched at word starts only
const TAX_KEYWORDS: &[&str] = &[
    "tax", "taxes", "irs", "deduct", "deduction", "write-off", "write off",
    "refund", "401k", "401(k)", "ira", "roth", "hsa", "capital gain", "withholding",
];

/// Ordered, duplicate-free set of structured experts. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExpertSelection(Vec<ExpertKind>);

impl ExpertSelection {
    fn baseline() -> Self {
        Self(vec![ExpertKind::FinancialAnalyst])
    }

    /// Adds an expert unless it is already present or has no schema.
    fn push(&mut self, kind: ExpertKind) {
        if kind.is_structured() && !self.0.contains(&kind) {
            self.0.push(kind);
        }
    }

    fn cap(&mut self, max_experts: usize) {
        self.0.truncate(max_experts.max(1));
    }

    pub fn experts(&self) -> &[ExpertKind] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, kind: ExpertKind) -> bool {
        self.0.contains(&kind)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Router {
    max_experts: usize,
}

impl Router {
    pub fn new(max_experts: usize) -> Self {
        Self { max_experts }
    }

    /// Uncapped candidate list, in rule order.
    pub fn candidates(
        question: &str,
        classification: &Classification,
        snapshot: &FinancialSnapshot,
    ) -> ExpertSelection {
        let mut selection = ExpertSelection::baseline();

        if classification.question_type.wants_advice() {
            selection.push(ExpertKind::BehavioralEconomist);
        }

        if classification.emotional_state.is_distressed() {
            selection.push(ExpertKind::BehavioralTherapist);
        }

        if snapshot.totals().total_liabilities > 0.0 {
            selection.push(ExpertKind::DebtStrategist);
        }

        if mentions_tax(question) {
            selection.push(ExpertKind::TaxOptimizer);
        }

        if classification.question_type.is_long_horizon() {
            selection.push(ExpertKind::GoalPlanner);
        }

        selection
    }

    pub fn route(
        &self,
        question: &str,
        classification: &Classification,
        snapshot: &FinancialSnapshot,
    ) -> ExpertSelection {
        let mut selection = Self::candidates(question, classification, snapshot);
        selection.cap(self.max_experts);
        selection
    }
}

pub fn mentions_tax(question: &str) -> bool {
    let lowered = question.to_lowercase();
    TAX_KEYWORDS.iter().any(|kw| {
        lowered
            .match_indices(kw)
            .any(|(start, _)| is_word_start(&lowered, start))
    })
}

/// Keeps "ira" from matching inside "admiration".
fn is_word_start(text: &str, index: usize) -> bool {
    text[..index]
        .chars()
        .next_back()
        .map(|c| !c.is_alphanumeric())
        .unwrap_or(true)
}
