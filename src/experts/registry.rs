//! Expert catalog
//!
//! Every expert is a variant of [`ExpertKind`]; its instruction and output
//! schema come from the exhaustive [`ExpertKind::spec`] lookup, so adding or
//! removing an expert is a compile-time change.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertKind {
    FinancialAnalyst,
    BehavioralEconomist,
    BehavioralTherapist,
    DebtStrategist,
    TaxOptimizer,
    GoalPlanner,
    /// Free-text role, only used for the final synthesis.
    Synthesizer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Text,
    TextList,
    Number,
    /// One of `low`, `medium`, `high`.
    Confidence,
}

#[derive(Debug, Clone, Copy)]
pub struct PropertySpec {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ExpertSpec {
    pub kind: ExpertKind,
    pub display_name: &'static str,
    pub instruction: &'static str,
    /// `None` for free-text roles.
    pub properties: Option<&'static [PropertySpec]>,
}

pub const CONFIDENCE_LEVELS: [&str; 3] = ["low", "medium", "high"];

const fn prop(name: &'static str, kind: PropertyKind, description: &'static str) -> PropertySpec {
    PropertySpec {
        name,
        kind,
        description,
    }
}

const CLAIMS: PropertySpec = prop(
    "claims",
    PropertyKind::TextList,
    "Concrete findings grounded in the snapshot numbers",
);
const RISKS: PropertySpec = prop(
    "risks",
    PropertyKind::TextList,
    "Risks or caveats the user should know about",
);
const CONFIDENCE: PropertySpec = prop(
    "confidence",
    PropertyKind::Confidence,
    "How confident the analysis is given the available data",
);

const ANALYST_PROPERTIES: &[PropertySpec] = &[
    CLAIMS,
    prop("key_metrics", PropertyKind::TextList, "Key ratios and figures, each with its value"),
    prop("cashflow_assessment", PropertyKind::Text, "One paragraph on monthly cashflow health"),
    RISKS,
    CONFIDENCE,
];

const ECONOMIST_PROPERTIES: &[PropertySpec] = &[
    CLAIMS,
    prop("biases_detected", PropertyKind::TextList, "Likely behavioral biases at play"),
    prop("nudges", PropertyKind::TextList, "Small behavioral nudges that would help"),
    RISKS,
    CONFIDENCE,
];

const THERAPIST_PROPERTIES: &[PropertySpec] = &[
    CLAIMS,
    prop("emotional_read", PropertyKind::Text, "What the user seems to be feeling and why"),
    prop("grounding_steps", PropertyKind::TextList, "Calming, concrete first steps"),
    RISKS,
    CONFIDENCE,
];

const DEBT_PROPERTIES: &[PropertySpec] = &[
    CLAIMS,
    prop("payoff_method", PropertyKind::Text, "Recommended payoff method (avalanche, snowball, ...)"),
    prop("monthly_payment_target", PropertyKind::Number, "Suggested monthly debt payment"),
    RISKS,
    CONFIDENCE,
];

const TAX_PROPERTIES: &[PropertySpec] = &[
    CLAIMS,
    prop("opportunities", PropertyKind::TextList, "Tax-advantaged moves worth considering"),
    prop("caveats", PropertyKind::TextList, "Jurisdiction or eligibility caveats"),
    RISKS,
    CONFIDENCE,
];

const GOAL_PROPERTIES: &[PropertySpec] = &[
    CLAIMS,
    prop("milestones", PropertyKind::TextList, "Ordered milestones toward the goal"),
    prop("monthly_savings_target", PropertyKind::Number, "Suggested monthly savings amount"),
    RISKS,
    CONFIDENCE,
];

const SHARED_RULES: &str = r#"
Rules:
- Use only the numbers in the provided snapshot; never invent figures
- Keep every claim short and specific
- Respond with a single JSON object that matches the schema exactly"#;

const ANALYST_INSTRUCTION: &str = r#"You are a meticulous financial analyst.
Assess income, fixed costs, spending, assets and liabilities from the snapshot.
Identify the metrics that matter most for the user's question."#;

const ECONOMIST_INSTRUCTION: &str = r#"You are a behavioral economist.
Look at the question and the snapshot for signs of present bias, loss aversion,
mental accounting or anchoring, and suggest practical nudges."#;

const THERAPIST_INSTRUCTION: &str = r#"You are a financial therapist.
Read the emotional tone of the question. Identify what is driving the stress and
propose grounding steps that are small enough to start today."#;

const DEBT_INSTRUCTION: &str = r#"You are a debt strategist.
Use the liabilities and monthly cashflow to propose a payoff method and a
sustainable monthly payment target."#;

const TAX_INSTRUCTION: &str = r#"You are a tax optimization specialist.
Point out tax-advantaged accounts, deductions or timing strategies relevant to the
question. Flag anything that depends on jurisdiction."#;

const GOAL_INSTRUCTION: &str = r#"You are a long-horizon goal planner.
Translate the user's goal into milestones and a monthly savings target that fits
the current cashflow."#;

const SYNTHESIZER_INSTRUCTION: &str = r#"You are a warm, plain-spoken personal finance advisor.
You receive the user's question, their financial snapshot and a set of internal
analysis notes. Write one cohesive answer addressed directly to the user.

Never mention analysis notes, specialists, agents, experts, schemas or any internal
process. Speak as a single advisor. Use the user's actual numbers. Keep it under
350 words and end with one clear next step."#;

impl ExpertKind {
    /// Experts with a structured output schema, in priority order.
    pub const STRUCTURED: [ExpertKind; 6] = [
        ExpertKind::FinancialAnalyst,
        ExpertKind::BehavioralEconomist,
        ExpertKind::BehavioralTherapist,
        ExpertKind::DebtStrategist,
        ExpertKind::TaxOptimizer,
        ExpertKind::GoalPlanner,
    ];

    pub fn spec(&self) -> ExpertSpec {
        let (display_name, instruction, properties) = match self {
            ExpertKind::FinancialAnalyst => {
                ("Financial Analyst", ANALYST_INSTRUCTION, Some(ANALYST_PROPERTIES))
            }
            ExpertKind::BehavioralEconomist => {
                ("Behavioral Economist", ECONOMIST_INSTRUCTION, Some(ECONOMIST_PROPERTIES))
            }
            ExpertKind::BehavioralTherapist => {
                ("Financial Therapist", THERAPIST_INSTRUCTION, Some(THERAPIST_PROPERTIES))
            }
            ExpertKind::DebtStrategist => {
                ("Debt Strategist", DEBT_INSTRUCTION, Some(DEBT_PROPERTIES))
            }
            ExpertKind::TaxOptimizer => ("Tax Optimizer", TAX_INSTRUCTION, Some(TAX_PROPERTIES)),
            ExpertKind::GoalPlanner => ("Goal Planner", GOAL_INSTRUCTION, Some(GOAL_PROPERTIES)),
            ExpertKind::Synthesizer => ("Advisor", SYNTHESIZER_INSTRUCTION, None),
        };

        ExpertSpec {
            kind: *self,
            display_name,
            instruction,
            properties,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpertKind::FinancialAnalyst => "financial_analyst",
            ExpertKind::BehavioralEconomist => "behavioral_economist",
            ExpertKind::BehavioralTherapist => "behavioral_therapist",
            ExpertKind::DebtStrategist => "debt_strategist",
            ExpertKind::TaxOptimizer => "tax_optimizer",
            ExpertKind::GoalPlanner => "goal_planner",
            ExpertKind::Synthesizer => "synthesizer",
        }
    }

    pub fn is_structured(&self) -> bool {
        self.spec().properties.is_some()
    }
}

impl fmt::Display for ExpertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ExpertSpec {
    /// Full system instruction sent with the structured request.
    pub fn system_instruction(&self) -> String {
        if self.properties.is_some() {
            format!("{}\n{}", self.instruction, SHARED_RULES)
        } else {
            self.instruction.to_string()
        }
    }

    /// Strict JSON schema: every declared property required, nothing else allowed.
    pub fn json_schema(&self) -> Option<Value> {
        let properties = self.properties?;

        let mut props = Map::new();
        for p in properties {
            let schema = match p.kind {
                PropertyKind::Text => json!({ "type": "string", "description": p.description }),
                PropertyKind::TextList => json!({
                    "type": "array",
                    "items": { "type": "string" },
                    "description": p.description
                }),
                PropertyKind::Number => json!({ "type": "number", "description": p.description }),
                PropertyKind::Confidence => json!({
                    "type": "string",
                    "enum": CONFIDENCE_LEVELS,
                    "description": p.description
                }),
            };
            props.insert(p.name.to_string(), schema);
        }

        let required: Vec<&str> = properties.iter().map(|p| p.name).collect();

        Some(json!({
            "type": "object",
            "properties": props,
            "required": required,
            "additionalProperties": false
        }))
    }

    /// Check a parsed value against the declared properties.
    pub fn conform(&self, value: &Value) -> Result<(), String> {
        let properties = self
            .properties
            .ok_or_else(|| format!("{} has no output schema", self.kind))?;

        let object = value
            .as_object()
            .ok_or_else(|| "expected a JSON object".to_string())?;

        for p in properties {
            let field = object
                .get(p.name)
                .ok_or_else(|| format!("missing property '{}'", p.name))?;

            let ok = match p.kind {
                PropertyKind::Text => field.is_string(),
                PropertyKind::TextList => field
                    .as_array()
                    .map(|items| items.iter().all(Value::is_string))
                    .unwrap_or(false),
                PropertyKind::Number => field.is_number(),
                PropertyKind::Confidence => field
                    .as_str()
                    .map(|s| CONFIDENCE_LEVELS.contains(&s))
                    .unwrap_or(false),
            };

            if !ok {
                return Err(format!("property '{}' has the wrong type", p.name));
            }
        }

        if let Some(extra) = object
            .keys()
            .find(|k| !properties.iter().any(|p| p.name == k.as_str()))
        {
            return Err(format!("undeclared property '{}'", extra));
        }

        Ok(())
    }

    /// Placeholder output for an expert whose answer could not be used.
    /// Still conforms to the schema.
    pub fn degraded_data(&self, note: &str) -> Value {
        let mut object = Map::new();

        for p in self.properties.unwrap_or(&[]) {
            let value = match (p.name, p.kind) {
                ("risks", _) => json!([note]),
                (_, PropertyKind::Text) => json!(""),
                (_, PropertyKind::TextList) => json!([]),
                (_, PropertyKind::Number) => json!(0),
                (_, PropertyKind::Confidence) => json!(CONFIDENCE_LEVELS[0]),
            };
            object.insert(p.name.to_string(), value);
        }

        Value::Object(object)
    }
}
