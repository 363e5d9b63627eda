//! Core data models for the advice pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::OrchestrationError;
use crate::experts::ExpertKind;

//
// ================= Request =================
//

/// Inbound advice request. Missing fields deserialize as empty and are
/// rejected by [`AdviceRequest::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub account_id: String,
}

impl AdviceRequest {
    pub fn new(question: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            account_id: account_id.into(),
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.question.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "question must not be empty".to_string(),
            ));
        }
        if self.account_id.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "accountId must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

//
// ================= Raw Records =================
//

/// Raw itemized records as they come out of storage. Amounts may be
/// missing or negative; both coerce to zero when a snapshot is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecords {
    #[serde(default)]
    pub fixed_costs: Vec<FixedCostRecord>,
    #[serde(default)]
    pub incomes: Vec<IncomeRecord>,
    #[serde(default)]
    pub assets: Vec<ValueRecord>,
    #[serde(default)]
    pub liabilities: Vec<ValueRecord>,
    #[serde(default)]
    pub spending: Vec<ValueRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedCostRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeRecord {
    #[serde(default)]
    pub source: String,
    pub monthly_amount: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub value: Option<f64>,
}

//
// ================= Snapshot =================
//

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedCost {
    pub name: String,
    pub category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Income {
    pub source: String,
    pub monthly_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueItem {
    pub name: String,
    pub category: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTotals {
    pub total_fixed_costs: f64,
    pub total_monthly_income: f64,
    pub total_assets: f64,
    pub total_liabilities: f64,
    pub total_spending: f64,
    pub net_worth_approx: f64,
    pub monthly_cashflow_approx: f64,
}

/// Normalized, immutable financial snapshot for one account.
///
/// Only constructible from [`SnapshotRecords`], so `totals` is always the
/// sum of the itemized lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSnapshot {
    fixed_costs: Vec<FixedCost>,
    incomes: Vec<Income>,
    assets: Vec<ValueItem>,
    liabilities: Vec<ValueItem>,
    spending: Vec<ValueItem>,
    totals: SnapshotTotals,
}

/// Negative, missing and non-finite amounts count as zero.
fn coerce_amount(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => 0.0,
    }
}

fn value_items(records: Vec<ValueRecord>) -> Vec<ValueItem> {
    records
        .into_iter()
        .map(|r| ValueItem {
            name: r.name,
            category: r.category,
            value: coerce_amount(r.value),
        })
        .collect()
}

fn sum_values(items: &[ValueItem]) -> f64 {
    items.iter().map(|i| i.value).sum()
}

impl FinancialSnapshot {
    pub fn from_records(records: SnapshotRecords) -> Self {
        let fixed_costs: Vec<FixedCost> = records
            .fixed_costs
            .into_iter()
            .map(|r| FixedCost {
                name: r.name,
                category: r.category,
                amount: coerce_amount(r.amount),
            })
            .collect();

        let incomes: Vec<Income> = records
            .incomes
            .into_iter()
            .map(|r| Income {
                source: r.source,
                monthly_amount: coerce_amount(r.monthly_amount),
            })
            .collect();

        let assets = value_items(records.assets);
        let liabilities = value_items(records.liabilities);
        let spending = value_items(records.spending);

        let total_fixed_costs: f64 = fixed_costs.iter().map(|c| c.amount).sum();
        let total_monthly_income: f64 = incomes.iter().map(|i| i.monthly_amount).sum();
        let total_assets = sum_values(&assets);
        let total_liabilities = sum_values(&liabilities);
        let total_spending = sum_values(&spending);

        let totals = SnapshotTotals {
            total_fixed_costs,
            total_monthly_income,
            total_assets,
            total_liabilities,
            total_spending,
            net_worth_approx: total_assets - total_liabilities,
            monthly_cashflow_approx: total_monthly_income - total_fixed_costs - total_spending,
        };

        Self {
            fixed_costs,
            incomes,
            assets,
            liabilities,
            spending,
            totals,
        }
    }

    pub fn totals(&self) -> &SnapshotTotals {
        &self.totals
    }

    pub fn fixed_costs(&self) -> &[FixedCost] {
        &self.fixed_costs
    }

    pub fn incomes(&self) -> &[Income] {
        &self.incomes
    }

    pub fn assets(&self) -> &[ValueItem] {
        &self.assets
    }

    pub fn liabilities(&self) -> &[ValueItem] {
        &self.liabilities
    }

    pub fn spending(&self) -> &[ValueItem] {
        &self.spending
    }

    pub fn item_count(&self) -> usize {
        self.fixed_costs.len()
            + self.incomes.len()
            + self.assets.len()
            + self.liabilities.len()
            + self.spending.len()
    }
}

//
// ================= Classification =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Factual,
    Recommendation,
    Strategy,
    Planning,
    Comparison,
}

impl QuestionType {
    pub const ALL: [QuestionType; 5] = [
        QuestionType::Factual,
        QuestionType::Recommendation,
        QuestionType::Strategy,
        QuestionType::Planning,
        QuestionType::Comparison,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Factual => "factual",
            QuestionType::Recommendation => "recommendation",
            QuestionType::Strategy => "strategy",
            QuestionType::Planning => "planning",
            QuestionType::Comparison => "comparison",
        }
    }

    /// The user is asking what they should do.
    pub fn wants_advice(&self) -> bool {
        matches!(self, QuestionType::Recommendation | QuestionType::Strategy)
    }

    pub fn is_long_horizon(&self) -> bool {
        matches!(self, QuestionType::Planning)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalState {
    Calm,
    Curious,
    Motivated,
    Anxious,
    Defensive,
    Overwhelmed,
}

impl EmotionalState {
    pub const ALL: [EmotionalState; 6] = [
        EmotionalState::Calm,
        EmotionalState::Curious,
        EmotionalState::Motivated,
        EmotionalState::Anxious,
        EmotionalState::Defensive,
        EmotionalState::Overwhelmed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionalState::Calm => "calm",
            EmotionalState::Curious => "curious",
            EmotionalState::Motivated => "motivated",
            EmotionalState::Anxious => "anxious",
            EmotionalState::Defensive => "defensive",
            EmotionalState::Overwhelmed => "overwhelmed",
        }
    }

    pub fn is_distressed(&self) -> bool {
        matches!(
            self,
            EmotionalState::Anxious | EmotionalState::Defensive | EmotionalState::Overwhelmed
        )
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for EmotionalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub question_type: QuestionType,
    pub emotional_state: EmotionalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_needed: Option<bool>,
}

//
// ================= Expert Output =================
//

/// Output of one expert. `data` always carries every property the expert's
/// schema declares and nothing else, degraded or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpertResult {
    pub expert_id: ExpertKind,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl ExpertResult {
    pub fn confidence(&self) -> &str {
        self.data
            .get("confidence")
            .and_then(|v| v.as_str())
            .unwrap_or("low")
    }
}
