//! Passage corpus access
//!
//! Provides:
//! - Passage record types
//! - The `PassageSource` seam the pipeline reads through
//! - SQLite-backed and in-memory sources
//!
//! The corpus is read-only here. Ingestion happens elsewhere.

mod sqlite;

pub use sqlite::SqliteCorpus;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Structured metadata stored alongside each passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageMetadata {
    pub title: String,

    #[serde(default)]
    pub original_url: Option<String>,

    /// Any other keys written by the indexer
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PassageMetadata {
    pub fn new(title: impl Into<String>, original_url: Option<String>) -> Self {
        Self {
            title: title.into(),
            original_url,
            extra: serde_json::Map::new(),
        }
    }
}

/// One retrievable unit of corpus text
#[derive(Debug, Clone, PartialEq)]
pub struct PassageRecord {
    /// Storage row id
    pub id: i64,
    pub metadata: PassageMetadata,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Source of passage records
#[async_trait]
pub trait PassageSource: Send + Sync {
    /// Load every record currently in the corpus
    async fn load_all(&self) -> Result<Vec<PassageRecord>>;

    /// Check that the corpus is reachable
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Fixed in-memory corpus
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    records: Vec<PassageRecord>,
}

impl InMemoryCorpus {
    pub fn new(records: Vec<PassageRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl PassageSource for InMemoryCorpus {
    async fn load_all(&self) -> Result<Vec<PassageRecord>> {
        Ok(self.records.clone())
    }
}
