//! askdocs Common Library
//!
//! Everything behind the HTTP surface:
//! - Configuration and error types
//! - Passage corpus access (SQLite)
//! - Embedding and chat completion clients
//! - Cosine ranking and answer synthesis
//! - Image text extraction
//! - The query orchestrator tying it together

pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod ocr;
pub mod pipeline;
pub mod retrieval;
pub mod synthesis;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::AppConfig;
pub use corpus::{PassageRecord, PassageSource, SqliteCorpus};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use ocr::{ImagePayload, TextExtractor};
pub use pipeline::{AnswerResult, QueryInput, QueryOrchestrator};
pub use retrieval::Ranker;
pub use synthesis::AnswerSynthesizer;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
