//! Configuration management for askdocs services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values
//!
//! `AIPIPE_TOKEN`, when present, is used as the upstream API key.

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable accepted as the upstream bearer token
pub const UPSTREAM_TOKEN_ENV: &str = "AIPIPE_TOKEN";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared settings for the OpenAI-compatible upstream
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Completion service configuration
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Passage corpus storage
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Ranking configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Image text extraction
    #[serde(default)]
    pub ocr: OcrConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum accepted request body (JSON or multipart)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// API base URL, without the trailing endpoint path
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bearer token for the upstream
    pub api_key: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    /// Completion provider: openai, mock
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Chat model to use
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// System instruction override
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorpusConfig {
    /// SQLite connection URL
    #[serde(default = "default_corpus_url")]
    pub url: String,

    /// Table holding passage records
    #[serde(default = "default_corpus_table")]
    pub table: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Number of passages handed to the synthesizer
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrConfig {
    /// Run OCR on attached images
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Tesseract executable name or path
    #[serde(default = "default_ocr_binary")]
    pub binary: String,

    /// Tesseract language code
    #[serde(default = "default_ocr_language")]
    pub language: String,

    /// Recognition timeout in seconds
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 60 }
fn default_max_body_bytes() -> usize { 10 * 1024 * 1024 }
fn default_api_base() -> String { "https://aipipe.org/openai/v1".to_string() }
fn default_upstream_timeout() -> u64 { 15 }
fn default_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_chat_model() -> String { "gpt-4o-mini".to_string() }
fn default_corpus_url() -> String { "sqlite://chunks.db?mode=ro".to_string() }
fn default_corpus_table() -> String { "chunks".to_string() }
fn default_top_k() -> usize { 3 }
fn default_enabled() -> bool { true }
fn default_ocr_binary() -> String { "tesseract".to_string() }
fn default_ocr_language() -> String { "eng".to_string() }
fn default_ocr_timeout() -> u64 { 15 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "askdocs".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            system_prompt: None,
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            url: default_corpus_url(),
            table: default_corpus_table(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: default_top_k() }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            binary: default_ocr_binary(),
            language: default_ocr_language(),
            timeout_secs: default_ocr_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .set_override_option("upstream.api_key", std::env::var(UPSTREAM_TOKEN_ENV).ok())?
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(AppError::Configuration {
                message: "retrieval.top_k must be at least 1".to_string(),
            });
        }

        if self.upstream.timeout_secs == 0 || self.ocr.timeout_secs == 0 {
            return Err(AppError::Configuration {
                message: "timeouts must be greater than zero".to_string(),
            });
        }

        let needs_key = self.embedding.provider != "mock" || self.completion.provider != "mock";
        let has_key = self
            .upstream
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        if needs_key && !has_key {
            return Err(AppError::Configuration {
                message: format!(
                    "upstream.api_key (or {}) is required unless both providers are \"mock\"",
                    UPSTREAM_TOKEN_ENV
                ),
            });
        }

        Ok(())
    }

    /// Get upstream call timeout as Duration
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    /// Get whole-request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get OCR timeout as Duration
    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr.timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            embedding: EmbeddingConfig::default(),
            completion: CompletionConfig::default(),
            corpus: CorpusConfig::default(),
            retrieval: RetrievalConfig::default(),
            ocr: OcrConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
