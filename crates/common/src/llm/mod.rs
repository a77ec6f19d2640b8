//! Chat-model client
//!
//! One trait, `LanguageModel`, covers every chat call the service makes:
//! search titles, per-paper claim extraction and research-angle generation.
//! `OpenAiChat` talks to an OpenAI-compatible `/chat/completions` endpoint;
//! `MockLanguageModel` answers from a closure for tests and local runs.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a chat call is for; used for metrics and by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Title,
    ClaimExtraction,
    AngleGeneration,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Title => "title",
            Purpose::ClaimExtraction => "claim_extraction",
            Purpose::AngleGeneration => "angle_generation",
        }
    }
}

/// A single system + user prompt exchange
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub purpose: Purpose,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the provider for a JSON object reply
    pub json: bool,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Return the assistant message content
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI chat completions client
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "llm.api_key (or OPENAI_API_KEY) is required".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let base = config
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
        })
    }

    async fn send(&self, request: &ChatRequest) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LlmError {
                message: format!("LLM API request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LlmError {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let parsed: CompletionResponse = response.json().await.map_err(|e| AppError::LlmError {
            message: format!("Failed to parse LLM response: {}", e),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::LlmError {
                message: "LLM returned no content".to_string(),
            })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let started = Instant::now();
        let result = self.send(request).await;
        crate::metrics::record_llm(
            started.elapsed().as_secs_f64(),
            request.purpose.as_str(),
            result.is_ok(),
        );
        if let Err(ref e) = result {
            tracing::warn!(purpose = request.purpose.as_str(), error = %e, "Chat completion failed");
        }
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

type Responder = dyn Fn(&ChatRequest) -> Result<String> + Send + Sync;

/// Scriptable chat model for tests
pub struct MockLanguageModel {
    responder: Box<Responder>,
    calls: AtomicUsize,
}

impl MockLanguageModel {
    /// Answer every request with `responder`
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    /// Plausible canned replies for each purpose
    pub fn canned() -> Self {
        Self::new(|request| Ok(canned_reply(request.purpose)))
    }

    /// Number of `complete` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::canned()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(request)
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

/// Canned reply used by `MockLanguageModel::canned`
pub fn canned_reply(purpose: Purpose) -> String {
    match purpose {
        Purpose::Title => "\"Sparse Graph Learning\"".to_string(),
        Purpose::ClaimExtraction => serde_json::json!({
            "claims": ["The proposed method improves accuracy on standard benchmarks"],
            "methods": ["Transformer encoder", "Contrastive pretraining"],
            "limitations": ["Evaluated only on English datasets"],
            "conclusion": "The approach is effective but narrowly evaluated."
        })
        .to_string(),
        Purpose::AngleGeneration => serde_json::json!({
            "angles": [
                {
                    "title": "Multilingual evaluation",
                    "description": "Extend the evaluation to low-resource languages.",
                    "novelty": 7, "practicality": 8, "impact": 6,
                    "reasoning": "Every analysed paper evaluates on English only.",
                    "briefPlan": ["Collect datasets", "Re-run baselines"],
                    "relatedLimitations": ["Evaluated only on English datasets"]
                },
                {
                    "title": "Efficiency study",
                    "description": "Measure compute cost against accuracy gains.",
                    "novelty": 5, "practicality": 9, "impact": 5,
                    "reasoning": "Costs are not reported.",
                    "briefPlan": ["Profile training", "Compare baselines"],
                    "relatedLimitations": []
                },
                {
                    "title": "Theoretical grounding",
                    "description": "Explain why contrastive pretraining helps.",
                    "novelty": 9, "practicality": 4, "impact": 8,
                    "reasoning": "No analysis is offered.",
                    "briefPlan": ["Formalize setting", "Prove bounds"],
                    "relatedLimitations": []
                },
                {
                    "title": "Dataset audit",
                    "description": "Audit benchmark leakage.",
                    "novelty": 4, "practicality": 6, "impact": 4,
                    "reasoning": "Benchmarks may overlap with pretraining data.",
                    "briefPlan": ["Hash documents"],
                    "relatedLimitations": []
                }
            ]
        })
        .to_string(),
    }
}

/// Parse a JSON reply, tolerating a surrounding Markdown code fence
pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| AppError::LlmError {
        message: format!("Malformed JSON reply: {}", e),
    })
}

/// Create a chat model based on configuration
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "mock" => Ok(Arc::new(MockLanguageModel::canned())),
        other => Err(AppError::Configuration {
            message: format!("Unknown llm provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Reply {
        value: i32,
    }

    #[test]
    fn test_parse_plain_json() {
        let reply: Reply = parse_json_reply(r#"{"value": 3}"#).unwrap();
        assert_eq!(reply.value, 3);
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply: Reply = parse_json_reply("```json\n{\"value\": 4}\n```").unwrap();
        assert_eq!(reply.value, 4);

        let reply: Reply = parse_json_reply("```\n{\"value\": 5}\n```\n").unwrap();
        assert_eq!(reply.value, 5);
    }

    #[test]
    fn test_parse_garbage_is_llm_error() {
        let result: Result<Reply> = parse_json_reply("Sure! Here you go.");
        assert!(matches!(result, Err(AppError::LlmError { .. })));
    }

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let model = MockLanguageModel::new(|req| Ok(req.user.to_uppercase()));
        let request = ChatRequest {
            purpose: Purpose::Title,
            system: String::new(),
            user: "abc".to_string(),
            max_tokens: 20,
            temperature: 0.7,
            json: false,
        };
        assert_eq!(model.complete(&request).await.unwrap(), "ABC");
        assert_eq!(model.calls(), 1);
    }
}
