//! Flat cosine-similarity ranking
//!
//! Every record is scored against the query vector; there is no index.
//! Ties keep corpus order, so identical inputs always rank identically.

use crate::corpus::PassageRecord;
use crate::errors::{AppError, Result};

/// Default number of passages handed to the synthesizer
pub const DEFAULT_TOP_K: usize = 3;

/// A passage paired with its similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub record: PassageRecord,

    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Cosine similarity between two vectors of equal length
///
/// A zero-magnitude or non-finite vector scores 0.0, so the result always
/// lies in [-1, 1]. `record_id` only labels the error.
pub fn cosine_similarity(query: &[f32], candidate: &[f32], record_id: i64) -> Result<f32> {
    if query.is_empty() || query.len() != candidate.len() {
        return Err(AppError::DimensionMismatch {
            record_id,
            expected: query.len(),
            found: candidate.len(),
        });
    }

    let (mut dot, mut query_sq, mut candidate_sq) = (0.0f64, 0.0f64, 0.0f64);
    for (&q, &c) in query.iter().zip(candidate) {
        let (q, c) = (f64::from(q), f64::from(c));
        dot += q * c;
        query_sq += q * q;
        candidate_sq += c * c;
    }

    let denom = query_sq.sqrt() * candidate_sq.sqrt();
    if !dot.is_finite() || !denom.is_finite() || denom <= f64::EPSILON {
        return Ok(0.0);
    }

    Ok((dot / denom).clamp(-1.0, 1.0) as f32)
}

/// Top-K ranker
#[derive(Debug, Clone, Copy)]
pub struct Ranker {
    top_k: usize,
}

impl Default for Ranker {
    fn default() -> Self {
        Self { top_k: DEFAULT_TOP_K }
    }
}

impl Ranker {
    pub fn new(top_k: usize) -> Self {
        Self { top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Score all records and return the `top_k` best, highest first
    pub fn rank(&self, query: &[f32], records: Vec<PassageRecord>) -> Result<Vec<ScoredPassage>> {
        let mut scored = Vec::with_capacity(records.len());
        for record in records {
            let score = cosine_similarity(query, &record.embedding, record.id)?;
            scored.push(ScoredPassage { record, score });
        }

        // sort_by is stable: equal scores stay in corpus order
        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(self.top_k);

        Ok(scored)
    }
}
