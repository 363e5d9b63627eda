//! Gemini API client
//!
//! Structured output via `generateContent` with a response schema, and
//! streamed prose via `streamGenerateContent?alt=sse`.
//! Uses a long-lived reqwest::Client for connection pooling.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::sse::{data_payload, LineBuffer, DONE_SENTINEL};
use super::{AnswerFragment, AnswerStream, CompletionClient, StructuredRequest, TextRequest};
use crate::error::OrchestrationError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, self.model, method)
    }

    fn ensure_key(&self) -> crate::Result<()> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::Config(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn post(
        &self,
        url: &str,
        body: &GeminiRequest,
        timeout: Option<Duration>,
    ) -> crate::Result<reqwest::Response> {
        let mut request = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body);

        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            error!("Gemini API request failed: {}", e);
            OrchestrationError::Llm(format!("Gemini API error: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::Llm(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn complete_json(&self, request: &StructuredRequest) -> crate::Result<String> {
        self.ensure_key()?;

        let body = GeminiRequest::new(
            &request.system_instruction,
            &request.user_payload,
            GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
                response_mime_type: Some("application/json".to_string()),
                response_json_schema: Some(request.schema.clone()),
            },
        );

        debug!(label = %request.label, "Calling Gemini generateContent");

        let response = self
            .post(&self.endpoint("generateContent"), &body, request.timeout)
            .await?;

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::Llm(format!("Gemini parse error: {}", e))
        })?;

        let text = gemini_response.text();
        if text.is_empty() {
            return Err(OrchestrationError::Llm(
                "Empty response from Gemini".to_string(),
            ));
        }

        info!(label = %request.label, bytes = text.len(), "Gemini structured response received");

        Ok(text)
    }

    async fn stream_text(&self, request: &TextRequest) -> crate::Result<AnswerStream> {
        self.ensure_key()?;

        let body = GeminiRequest::new(
            &request.system_instruction,
            &request.user_payload,
            GenerationConfig {
                temperature: 0.5,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
                response_mime_type: None,
                response_json_schema: None,
            },
        );

        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));

        debug!(label = %request.label, "Calling Gemini streamGenerateContent");

        let response = self.post(&url, &body, None).await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();

        Ok(fragment_stream(bytes))
    }
}

/// Lazily turn the SSE byte stream into answer fragments. The stream ends
/// with [`AnswerFragment::End`] only if the model reported a finish reason.
fn fragment_stream(bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> AnswerStream {
    let state = StreamState {
        bytes,
        lines: LineBuffer::new(),
        pending: VecDeque::new(),
        finish_reason: None,
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.lines.push(&chunk);
                    while let Some(line) = state.lines.next_line() {
                        state.absorb_line(&line);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((
                        Err(OrchestrationError::Stream(format!("stream read error: {}", e))),
                        state,
                    ));
                }
                None => {
                    if let Some(rest) = state.lines.finish() {
                        state.absorb_line(&rest);
                    }
                    // A body cut off before any finishReason gets no end marker.
                    if let Some(reason) = state.finish_reason.take() {
                        state.pending.push_back(AnswerFragment::End {
                            finish_reason: Some(reason),
                        });
                    }
                    state.finished = true;
                }
            }
        }
    });

    Box::pin(stream)
}

struct StreamState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    lines: LineBuffer,
    pending: VecDeque<AnswerFragment>,
    finish_reason: Option<String>,
    finished: bool,
}

impl StreamState {
    fn absorb_line(&mut self, line: &str) {
        let Some(payload) = data_payload(line) else {
            return;
        };
        if payload == DONE_SENTINEL {
            return;
        }

        match serde_json::from_str::<GeminiResponse>(payload) {
            Ok(chunk) => {
                if let Some(candidate) = chunk.candidates.first() {
                    for part in &candidate.content.parts {
                        if !part.text.is_empty() {
                            self.pending.push_back(AnswerFragment::Text(part.text.clone()));
                        }
                    }
                    if candidate.finish_reason.is_some() {
                        self.finish_reason = candidate.finish_reason.clone();
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "SSE parse error, skipping line");
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

impl GeminiRequest {
    fn new(system: &str, user: &str, generation_config: GenerationConfig) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part {
                    text: user.to_string(),
                }],
            }],
            generation_config,
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system.to_string(),
                }],
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_json_schema: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(chunks: Vec<&'static str>) -> BoxStream<'static, reqwest::Result<Vec<u8>>> {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec()))).boxed()
    }

    #[test]
    fn test_endpoint_respects_base_url() {
        let client = GeminiClient::new("key".into(), "gemini-test".into())
            .unwrap()
            .with_base_url("http://localhost:9000/models/");
        assert_eq!(
            client.endpoint("streamGenerateContent"),
            "http://localhost:9000/models/gemini-test:streamGenerateContent"
        );
    }

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest::new(
            "You are a financial advisor",
            "Should I pay off my card?",
            GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
                response_mime_type: Some("application/json".to_string()),
                response_json_schema: Some(serde_json::json!({"type": "object"})),
            },
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json["contents"][0]["parts"][0]["text"],
            "Should I pay off my card?"
        );
        assert_eq!(
            json["generation_config"]["response_mime_type"],
            "application/json"
        );
    }

    #[test]
    fn test_free_text_config_omits_schema() {
        let config = GenerationConfig {
            temperature: 0.5,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 1024,
            response_mime_type: None,
            response_json_schema: None,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("response_json_schema").is_none());
    }

    #[tokio::test]
    async fn test_fragment_stream_ends_with_marker() {
        let bytes = byte_stream(vec![
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]},",
            "\"finishReason\":\"STOP\"}]}\n\n",
        ]);

        let fragments: Vec<AnswerFragment> = fragment_stream(bytes)
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(
            fragments,
            vec![
                AnswerFragment::Text("Hel".into()),
                AnswerFragment::Text("lo".into()),
                AnswerFragment::End {
                    finish_reason: Some("STOP".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_truncated_body_has_no_end_marker() {
        let bytes = byte_stream(vec![
            ": keep-alive\n",
            "data: not json\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"ok\"}]}}]}",
        ]);

        let fragments: Vec<AnswerFragment> = fragment_stream(bytes)
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(fragments, vec![AnswerFragment::Text("ok".into())]);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_config_error() {
        let client = GeminiClient::new(String::new(), "gemini-2.0-flash".into()).unwrap();
        let request = TextRequest {
            label: "synthesizer".into(),
            system_instruction: "sys".into(),
            user_payload: "user".into(),
        };

        let err = client.stream_text(&request).await.err().unwrap();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }
}
