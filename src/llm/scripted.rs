//! Scripted completion client
//!
//! Deterministic stand-in for a real model. Keeps the pipeline runnable
//! without network access and lets tests inject malformed output or
//! stream failures per call label.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{AnswerFragment, AnswerStream, CompletionClient, StructuredRequest, TextRequest};
use crate::error::OrchestrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamScript {
    /// All tokens, then the end marker.
    Complete,
    /// First token, then a stream error.
    FailMidway,
    /// All tokens, but no end marker.
    Truncated,
}

pub struct ScriptedCompletionClient {
    classification: String,
    overrides: HashMap<String, String>,
    failing: HashSet<String>,
    tokens: Vec<String>,
    stream_script: StreamScript,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCompletionClient {
    pub fn new() -> Self {
        Self {
            classification: json!({
                "question_type": "recommendation",
                "emotional_state": "curious",
                "follow_up_needed": false
            })
            .to_string(),
            overrides: HashMap::new(),
            failing: HashSet::new(),
            tokens: ["Here is ", "where you ", "stand today."]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            stream_script: StreamScript::Complete,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Raw JSON text returned for the `classifier` call.
    pub fn with_classification(mut self, raw: impl Into<String>) -> Self {
        self.classification = raw.into();
        self
    }

    /// Raw text returned for a specific label, e.g. `expert:tax_optimizer`.
    pub fn with_response(mut self, label: impl Into<String>, raw: impl Into<String>) -> Self {
        self.overrides.insert(label.into(), raw.into());
        self
    }

    /// Make every call with this label fail at the transport level.
    pub fn failing(mut self, label: impl Into<String>) -> Self {
        self.failing.insert(label.into());
        self
    }

    pub fn with_tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_stream_script(mut self, script: StreamScript) -> Self {
        self.stream_script = script;
        self
    }

    /// Labels of every call issued so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn expert_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|label| label.starts_with("expert:"))
            .count()
    }

    fn record(&self, label: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(label.to_string());
        }
    }

    fn check_failure(&self, label: &str) -> crate::Result<()> {
        if self.failing.contains(label) {
            return Err(OrchestrationError::Llm(format!(
                "scripted failure for {}",
                label
            )));
        }
        Ok(())
    }
}

impl Default for ScriptedCompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a value that satisfies a strict object schema.
fn sample_for_schema(label: &str, schema: &Value) -> Value {
    let mut object = Map::new();

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            let value = if let Some(first) = property
                .get("enum")
                .and_then(Value::as_array)
                .and_then(|options| options.get(1).or_else(|| options.first()))
            {
                first.clone()
            } else {
                match property.get("type").and_then(Value::as_str) {
                    Some("array") => json!([format!("{} {}", label, name)]),
                    Some("number") => json!(250),
                    _ => json!(format!("{} {}", label, name)),
                }
            };
            object.insert(name.clone(), value);
        }
    }

    Value::Object(object)
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete_json(&self, request: &StructuredRequest) -> crate::Result<String> {
        self.record(&request.label);
        self.check_failure(&request.label)?;

        if let Some(raw) = self.overrides.get(&request.label) {
            return Ok(raw.clone());
        }

        if request.label == "classifier" {
            return Ok(self.classification.clone());
        }

        Ok(sample_for_schema(&request.label, &request.schema).to_string())
    }

    async fn stream_text(&self, request: &TextRequest) -> crate::Result<AnswerStream> {
        self.record(&request.label);
        self.check_failure(&request.label)?;

        let mut items: Vec<crate::Result<AnswerFragment>> = Vec::new();

        match self.stream_script {
            StreamScript::Complete | StreamScript::Truncated => {
                items.extend(
                    self.tokens
                        .iter()
                        .map(|t| Ok(AnswerFragment::Text(t.clone()))),
                );
                if self.stream_script == StreamScript::Complete {
                    items.push(Ok(AnswerFragment::End {
                        finish_reason: Some("STOP".to_string()),
                    }));
                }
            }
            StreamScript::FailMidway => {
                if let Some(first) = self.tokens.first() {
                    items.push(Ok(AnswerFragment::Text(first.clone())));
                }
                items.push(Err(OrchestrationError::Stream(
                    "scripted stream failure".to_string(),
                )));
            }
        }

        Ok(Box::pin(futures::stream::iter(items)))
    }
}
