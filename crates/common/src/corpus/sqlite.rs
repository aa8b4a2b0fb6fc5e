//! SQLite passage store
//!
//! Each read opens its own connection, scans the whole table and closes the
//! connection again, so every query sees the corpus as it is on disk.

use super::{PassageMetadata, PassageRecord, PassageSource};
use crate::config::CorpusConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, FromQueryResult,
    Statement,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Connection timeout for corpus reads
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed passage source
#[derive(Debug, Clone)]
pub struct SqliteCorpus {
    url: String,
    select_sql: String,
}

/// Raw row; every column is optional so one bad row cannot fail the scan
#[derive(Debug, FromQueryResult)]
struct ChunkRow {
    id: i64,
    metadata_json: Option<String>,
    content: Option<String>,
    embedding: Option<String>,
}

impl SqliteCorpus {
    /// Create a corpus reader for `table` at `url`
    pub fn new(url: impl Into<String>, table: &str) -> Result<Self> {
        let valid_table = !table.is_empty()
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_table {
            return Err(AppError::Configuration {
                message: format!("Invalid corpus table name: {:?}", table),
            });
        }

        Ok(Self {
            url: url.into(),
            select_sql: format!(
                "SELECT rowid AS id, metadata_json, content, embedding FROM {} ORDER BY rowid",
                table
            ),
        })
    }

    /// Create from configuration
    pub fn from_config(config: &CorpusConfig) -> Result<Self> {
        Self::new(config.url.clone(), &config.table)
    }

    async fn connect(&self) -> Result<DatabaseConnection> {
        let mut opts = ConnectOptions::new(&self.url);
        opts.max_connections(1)
            .min_connections(0)
            .connect_timeout(CONNECT_TIMEOUT)
            .sqlx_logging(false);

        Database::connect(opts)
            .await
            .map_err(|e| AppError::CorpusRead {
                message: format!("Failed to open corpus: {}", e),
            })
    }

    async fn close(conn: DatabaseConnection) {
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close corpus connection");
        }
    }
}

/// Parse one stored row, returning the reason when it is unusable
fn parse_row(row: ChunkRow) -> std::result::Result<PassageRecord, String> {
    let metadata_json = row.metadata_json.ok_or("metadata is null")?;
    let content = row.content.ok_or("content is null")?;
    let embedding_json = row.embedding.ok_or("embedding is null")?;

    let metadata: PassageMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| format!("invalid metadata: {}", e))?;

    let embedding: Vec<f32> = serde_json::from_str(&embedding_json)
        .map_err(|e| format!("invalid embedding: {}", e))?;

    if embedding.is_empty() {
        return Err("embedding is empty".to_string());
    }

    if embedding.iter().any(|v| !v.is_finite()) {
        return Err("embedding has non-finite values".to_string());
    }

    Ok(PassageRecord {
        id: row.id,
        metadata,
        content,
        embedding,
    })
}

#[async_trait]
impl PassageSource for SqliteCorpus {
    async fn load_all(&self) -> Result<Vec<PassageRecord>> {
        let conn = self.connect().await?;

        let rows = ChunkRow::find_by_statement(Statement::from_string(
            DbBackend::Sqlite,
            self.select_sql.clone(),
        ))
        .all(&conn)
        .await;

        Self::close(conn).await;
        let rows = rows?;

        let total = rows.len();
        let mut records = Vec::with_capacity(total);
        for row in rows {
            let id = row.id;
            match parse_row(row) {
                Ok(record) => records.push(record),
                Err(reason) => warn!(record_id = id, reason = %reason, "Skipping malformed passage record"),
            }
        }

        let skipped = total - records.len();
        metrics::record_skipped_records(skipped);
        debug!(loaded = records.len(), skipped, "Corpus loaded");

        Ok(records)
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.connect().await?;
        let result = conn.execute_unprepared("SELECT 1").await;
        Self::close(conn).await;

        result.map(|_| ()).map_err(|e| AppError::CorpusRead {
            message: format!("Corpus ping failed: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(rows: &[(&str, &str, &str)]) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());

        let conn = Database::connect(url.as_str()).await.unwrap();
        conn.execute_unprepared(
            "CREATE TABLE chunks (metadata_json TEXT, content TEXT, embedding TEXT)",
        )
        .await
        .unwrap();

        for (metadata, content, embedding) in rows {
            conn.execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "INSERT INTO chunks (metadata_json, content, embedding) VALUES (?, ?, ?)",
                [(*metadata).into(), (*content).into(), (*embedding).into()],
            ))
            .await
            .unwrap();
        }
        conn.close().await.unwrap();

        (dir, format!("sqlite://{}?mode=ro", path.display()))
    }

    #[tokio::test]
    async fn test_loads_records_in_storage_order() {
        let (_dir, url) = seed(&[
            (r#"{"title": "A", "original_url": "https://a"}"#, "alpha", "[1.0, 0.0]"),
            (r#"{"title": "B"}"#, "beta", "[0.0, 1.0]"),
        ])
        .await;

        let corpus = SqliteCorpus::new(url, "chunks").unwrap();
        let records = corpus.load_all().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metadata.title, "A");
        assert_eq!(records[0].metadata.original_url.as_deref(), Some("https://a"));
        assert_eq!(records[0].embedding, vec![1.0, 0.0]);
        assert_eq!(records[1].content, "beta");
        assert_eq!(records[1].metadata.original_url, None);
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let (_dir, url) = seed(&[
            (r#"{"title": "good"}"#, "ok", "[0.5, 0.5]"),
            (r#"{"title": "bad vector"}"#, "x", "not-json"),
            (r#"{"no_title": true}"#, "y", "[1.0, 1.0]"),
            (r#"{"title": "empty"}"#, "z", "[]"),
            (r#"{"title": "overflow"}"#, "w", "[1e300, 0.0]"),
        ])
        .await;

        let corpus = SqliteCorpus::new(url, "chunks").unwrap();
        let records = corpus.load_all().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata.title, "good");
        assert!(records[0].embedding.iter().all(|v| v.is_finite()));
    }

    #[tokio::test]
    async fn test_missing_database_is_corpus_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=ro", dir.path().join("absent.db").display());

        let corpus = SqliteCorpus::new(url, "chunks").unwrap();
        assert!(matches!(corpus.load_all().await, Err(AppError::CorpusRead { .. })));
        assert!(corpus.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_table_is_corpus_error() {
        let (_dir, url) = seed(&[]).await;

        let corpus = SqliteCorpus::new(url, "passages").unwrap();
        assert!(matches!(corpus.load_all().await, Err(AppError::CorpusRead { .. })));
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        assert!(SqliteCorpus::new("sqlite::memory:", "chunks; DROP TABLE chunks").is_err());
        assert!(SqliteCorpus::new("sqlite::memory:", "").is_err());
    }
}
