//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI-compatible `/embeddings` endpoints (text-embedding-3-small by default)
//! - A deterministic mock for local development
//!
//! Calls are made once; there is no retry loop. A failed or timed-out call
//! surfaces as `AppError::EmbeddingFailure`.

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
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
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn make_request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::EmbeddingFailure {
                message: if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("Request failed: {}", e)
                },
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingFailure {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::EmbeddingFailure {
                message: format!("Failed to parse response: {}", e),
            }
        })?;

        let embedding = result.data.into_iter().next().map(|d| d.embedding).ok_or_else(|| {
            AppError::EmbeddingFailure {
                message: "Response contained no embeddings".to_string(),
            }
        })?;

        if embedding.is_empty() {
            return Err(AppError::EmbeddingFailure {
                message: "Response contained an empty embedding".to_string(),
            });
        }

        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(AppError::EmbeddingFailure {
                message: "Response contained non-finite embedding values".to_string(),
            });
        }

        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let result = self.make_request(text).await;
        metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model, result.is_ok());

        if let Err(ref e) = result {
            tracing::warn!(model = %self.model, error = %e, "Embedding request failed");
        }

        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock embedder for development and testing
///
/// Vectors are pseudo-random but seeded from the SHA-256 of the input, so the
/// same text always maps to the same vector.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let seed: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        let mut rng = rand::rngs::StdRng::from_seed(seed);
        Ok((0..self.dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }
}

/// Dimension used by the mock embedder (matches text-embedding-3-small)
pub const MOCK_EMBEDDING_DIMENSION: usize = 1536;

/// Create an embedder based on configuration
pub fn create_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    match config.embedding.provider.as_str() {
        "openai" => {
            let key = config.upstream.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "OpenAI API key required for embeddings".to_string(),
            })?;
            Ok(Arc::new(OpenAIEmbedder::new(
                key,
                config.embedding.model.clone(),
                config.upstream.api_base.clone(),
                config.upstream_timeout(),
            )?))
        }
        "mock" => Ok(Arc::new(MockEmbedder::new(MOCK_EMBEDDING_DIMENSION))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider: {}", other),
        }),
    }
}
