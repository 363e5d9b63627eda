//! Question Classifier
//!
//! One structured call that tags the question with a question type and the
//! user's emotional state. Only snapshot totals are sent, never the itemized
//! lists. Output outside the closed enumerations is a failure, not a default.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::OrchestrationError;
use crate::llm::{strip_json_fence, CompletionClient, StructuredRequest};
use crate::models::{Classification, EmotionalState, QuestionType, SnapshotTotals};
use crate::Result;

const CLASSIFIER_INSTRUCTION: &str = r#"You triage personal finance questions.

Given a question and the user's financial totals, return:
- question_type: what kind of answer is being asked for
- emotional_state: how the user sounds
- follow_up_needed: true only if the question cannot be answered without more information

Respond with a single JSON object and nothing else."#;

pub struct Classifier {
    client: Arc<dyn CompletionClient>,
    timeout: Option<Duration>,
}

impl Classifier {
    pub fn new(client: Arc<dyn CompletionClient>, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }

    pub async fn classify(&self, question: &str, totals: &SnapshotTotals) -> Result<Classification> {
        let user_payload = json!({
            "question": question,
            "totals": totals,
        })
        .to_string();

        let request = StructuredRequest {
            label: "classifier".to_string(),
            system_instruction: CLASSIFIER_INSTRUCTION.to_string(),
            user_payload,
            schema: classification_schema(),
            timeout: self.timeout,
        };

        let call = self.client.complete_json(&request);

        let raw = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                OrchestrationError::Classification(format!(
                    "classifier timed out after {}s",
                    limit.as_secs()
                ))
            })?,
            None => call.await,
        }
        .map_err(|e| match e {
            OrchestrationError::Classification(_) => e,
            other => OrchestrationError::Classification(format!("classifier call failed: {}", other)),
        })?;

        let classification = parse_classification(&raw)?;

        debug!(
            question_type = %classification.question_type,
            emotional_state = %classification.emotional_state,
            "Question classified"
        );

        Ok(classification)
    }
}

/// Parse and validate classifier output against the closed enumerations.
pub fn parse_classification(raw: &str) -> Result<Classification> {
    serde_json::from_str::<Classification>(strip_json_fence(raw)).map_err(|e| {
        warn!(error = %e, "Classifier returned invalid output");
        OrchestrationError::Classification(format!("invalid classifier output: {}", e))
    })
}

pub fn classification_schema() -> serde_json::Value {
    let question_types: Vec<&str> = QuestionType::ALL.iter().map(|q| q.as_str()).collect();
    let emotional_states: Vec<&str> = EmotionalState::ALL.iter().map(|e| e.as_str()).collect();

    json!({
        "type": "object",
        "properties": {
            "question_type": { "type": "string", "enum": question_types },
            "emotional_state": { "type": "string", "enum": emotional_states },
            "follow_up_needed": { "type": "boolean" }
        },
        "required": ["question_type", "emotional_state"],
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedCompletionClient;

    #[test]
    fn test_parse_valid_classification() {
        let parsed = parse_classification(
            "```json\n{\"question_type\":\"planning\",\"emotional_state\":\"motivated\"}\n```",
        )
        .unwrap();

        assert_eq!(parsed.question_type, QuestionType::Planning);
        assert_eq!(parsed.emotional_state, EmotionalState::Motivated);
        assert_eq!(parsed.follow_up_needed, None);
    }

    #[test]
    fn test_out_of_enum_values_fail() {
        let cases = vec![
            r#"{"question_type":"rant","emotional_state":"calm"}"#,
            r#"{"question_type":"factual","emotional_state":"ecstatic"}"#,
            r#"{"question_type":"factual"}"#,
            "not json at all",
        ];

        for c in cases {
            let err = parse_classification(c).unwrap_err();
            assert!(matches!(err, OrchestrationError::Classification(_)), "{}", c);
        }
    }

    #[test]
    fn test_schema_lists_every_enum_member() {
        let schema = classification_schema();
        assert_eq!(
            schema["properties"]["question_type"]["enum"]
                .as_array()
                .unwrap()
                .len(),
            QuestionType::ALL.len()
        );
        assert_eq!(
            schema["properties"]["emotional_state"]["enum"]
                .as_array()
                .unwrap()
                .len(),
            EmotionalState::ALL.len()
        );
    }

    #[tokio::test]
    async fn test_classify_via_client() {
        let client = Arc::new(ScriptedCompletionClient::new().with_classification(
            r#"{"question_type":"recommendation","emotional_state":"anxious","follow_up_needed":true}"#,
        ));
        let classifier = Classifier::new(client.clone(), Some(Duration::from_secs(5)));

        let result = classifier
            .classify("What should I do about my credit card debt?", &SnapshotTotals::default())
            .await
            .unwrap();

        assert!(result.question_type.wants_advice());
        assert!(result.emotional_state.is_distressed());
        assert_eq!(result.follow_up_needed, Some(true));
        assert_eq!(client.calls(), vec!["classifier"]);
    }

    #[tokio::test]
    async fn test_transport_failure_is_classification_error() {
        let client = Arc::new(ScriptedCompletionClient::new().failing("classifier"));
        let classifier = Classifier::new(client, None);

        let err = classifier
            .classify("Am I saving enough?", &SnapshotTotals::default())
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::Classification(_)));
    }
}
