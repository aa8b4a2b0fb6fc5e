//! Answer synthesis - generates a grounded answer from ranked passages
//!
//! Provides:
//! - Context block assembly (passages in rank order)
//! - The two-message instruction sent to the completion model
//! - An OpenAI-compatible chat client and a mock for development

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::retrieval::ScoredPassage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default system instruction
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer questions based only on the provided chunks.";

/// Separator placed between passages in the context block
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Trait for answer generation
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    /// Answer `question` using `passages` as the only context
    async fn synthesize(&self, question: &str, passages: &[ScoredPassage]) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Chat message sent to the completion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

/// Join passage contents in rank order
pub fn build_context_block(passages: &[ScoredPassage]) -> String {
    passages
        .iter()
        .map(|p| p.record.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Build the system + user messages for a question
pub fn build_messages(system_prompt: &str, question: &str, passages: &[ScoredPassage]) -> Vec<ChatMessage> {
    let context = build_context_block(passages);

    vec![
        ChatMessage::new("system", system_prompt.to_string()),
        ChatMessage::new("user", format!("Context:\n{}\n\nQuestion:\n{}", context, question)),
    ]
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// OpenAI-compatible chat completion client
pub struct ChatSynthesizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    system_prompt: String,
}

impl ChatSynthesizer {
    /// Create a new synthesizer
    pub fn new(
        api_key: String,
        model: String,
        base_url: &str,
        system_prompt: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }

    /// Call the completion API
    async fn call_llm(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        let response = self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::SynthesisFailure {
                message: if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("LLM API request failed: {}", e)
                },
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::SynthesisFailure {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse = response.json().await
            .map_err(|e| AppError::SynthesisFailure {
                message: format!("Failed to parse LLM response: {}", e),
            })?;

        chat_response.choices.into_iter().next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::SynthesisFailure {
                message: "LLM response has no answer content".to_string(),
            })
    }
}

#[async_trait]
impl AnswerSynthesizer for ChatSynthesizer {
    async fn synthesize(&self, question: &str, passages: &[ScoredPassage]) -> Result<String> {
        let messages = build_messages(&self.system_prompt, question, passages);

        let start = Instant::now();
        let result = self.call_llm(messages).await;
        metrics::record_completion(start.elapsed().as_secs_f64(), &self.model, result.is_ok());

        if let Err(ref e) = result {
            tracing::warn!(model = %self.model, error = %e, "Completion request failed");
        }

        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock synthesizer for development
pub struct MockSynthesizer;

#[async_trait]
impl AnswerSynthesizer for MockSynthesizer {
    async fn synthesize(&self, question: &str, passages: &[ScoredPassage]) -> Result<String> {
        Ok(format!(
            "Mock answer to \"{}\" grounded in {} passage(s). [LLM API not configured]",
            question,
            passages.len()
        ))
    }

    fn model_name(&self) -> &str {
        "mock-completion"
    }
}

/// Create a synthesizer based on configuration
pub fn create_synthesizer(config: &AppConfig) -> Result<Arc<dyn AnswerSynthesizer>> {
    match config.completion.provider.as_str() {
        "openai" => {
            let key = config.upstream.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "OpenAI API key required for completions".to_string(),
            })?;
            Ok(Arc::new(ChatSynthesizer::new(
                key,
                config.completion.model.clone(),
                &config.upstream.api_base,
                config.completion.system_prompt.clone(),
                config.upstream_timeout(),
            )?))
        }
        "mock" => Ok(Arc::new(MockSynthesizer)),
        other => Err(AppError::Configuration {
            message: format!("Unknown completion provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{PassageMetadata, PassageRecord};
    use crate::test_support::spawn_stub;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    fn passage(title: &str, content: &str, score: f32) -> ScoredPassage {
        ScoredPassage {
            record: PassageRecord {
                id: 0,
                metadata: PassageMetadata::new(title, None),
                content: content.to_string(),
                embedding: vec![1.0],
            },
            score,
        }
    }

    fn synthesizer(base_url: &str) -> ChatSynthesizer {
        ChatSynthesizer::new(
            "sk-test".to_string(),
            "gpt-4o-mini".to_string(),
            base_url,
            None,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_context_block_joins_in_rank_order() {
        let passages = vec![passage("B", "beta text", 0.9), passage("A", "alpha text", 0.5)];
        assert_eq!(build_context_block(&passages), "beta text\n\nalpha text");
    }

    #[test]
    fn test_messages_layout() {
        let passages = vec![passage("A", "alpha", 0.9)];
        let messages = build_messages(DEFAULT_SYSTEM_PROMPT, "What is alpha?", &passages);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "Context:\nalpha\n\nQuestion:\nWhat is alpha?");
    }

    #[test]
    fn test_messages_with_no_passages() {
        let messages = build_messages(DEFAULT_SYSTEM_PROMPT, "Anything?", &[]);
        assert_eq!(messages[1].content, "Context:\n\n\nQuestion:\nAnything?");
    }

    #[tokio::test]
    async fn test_synthesize_returns_first_choice() {
        let router = Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "gpt-4o-mini");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["content"], "Context:\nalpha\n\nQuestion:\nWhy?");
                Json(json!({ "choices": [{ "message": { "role": "assistant", "content": "Because." } }] }))
            }),
        );
        let base = spawn_stub(router).await;

        let answer = synthesizer(&base)
            .synthesize("Why?", &[passage("A", "alpha", 1.0)])
            .await
            .unwrap();
        assert_eq!(answer, "Because.");
    }

    #[tokio::test]
    async fn test_missing_content_is_synthesis_failure() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { Json(json!({ "choices": [{ "message": { "role": "assistant" } }] })) }),
        );
        let base = spawn_stub(router).await;

        let err = synthesizer(&base).synthesize("Why?", &[]).await.unwrap_err();
        assert!(matches!(err, AppError::SynthesisFailure { .. }));
    }

    #[tokio::test]
    async fn test_no_choices_is_synthesis_failure() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { Json(json!({ "choices": [] })) }),
        );
        let base = spawn_stub(router).await;

        let err = synthesizer(&base).synthesize("Why?", &[]).await.unwrap_err();
        assert!(matches!(err, AppError::SynthesisFailure { .. }));
    }

    #[tokio::test]
    async fn test_upstream_error_is_synthesis_failure() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let base = spawn_stub(router).await;

        let err = synthesizer(&base).synthesize("Why?", &[]).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_mock_synthesizer_tolerates_empty_context() {
        let answer = MockSynthesizer.synthesize("Anything?", &[]).await.unwrap();
        assert!(answer.contains("0 passage(s)"));
    }
}
