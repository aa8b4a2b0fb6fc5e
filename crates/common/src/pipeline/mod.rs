//! Query orchestration
//!
//! Drives one question through the answer pipeline:
//!
//! `ValidatingInput -> ExtractingImageText -> Embedding -> Ranking -> Synthesizing -> Responding`
//!
//! Any stage may fail, which ends the request with that stage's error. Image
//! text only ever influences retrieval; the synthesizer always receives the
//! question exactly as the client sent it.

use crate::config::AppConfig;
use crate::corpus::PassageSource;
use crate::embeddings::{create_embedder, Embedder};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::ocr::{create_extractor, extract_payload, ImagePayload, OcrOutcome, TextExtractor};
use crate::retrieval::{Ranker, ScoredPassage};
use crate::synthesis::{create_synthesizer, AnswerSynthesizer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Raw request input, before validation
#[derive(Debug, Clone, Default)]
pub struct QueryInput {
    pub question: Option<String>,
    pub image: Option<ImagePayload>,
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    ValidatingInput,
    ExtractingImageText,
    Embedding,
    Ranking,
    Synthesizing,
    Responding,
}

impl QueryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStage::ValidatingInput => "validating_input",
            QueryStage::ExtractingImageText => "extracting_image_text",
            QueryStage::Embedding => "embedding",
            QueryStage::Ranking => "ranking",
            QueryStage::Synthesizing => "synthesizing",
            QueryStage::Responding => "responding",
        }
    }
}

/// Per-request state
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query_id: Uuid,
    pub question: String,
    pub image: Option<ImagePayload>,

    /// Text embedded for ranking (question, prefixed with image text when an image was sent)
    pub retrieval_query: String,

    /// Text posed to the completion model (always the original question)
    pub answer_query: String,
}

impl QueryContext {
    /// Validate input; the question is required and must not be blank
    pub fn new(query_id: Uuid, input: QueryInput) -> Result<Self> {
        let question = input
            .question
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| AppError::MissingField {
                field: "question".to_string(),
            })?;

        Ok(Self {
            query_id,
            retrieval_query: question.clone(),
            answer_query: question.clone(),
            question,
            image: input.image,
        })
    }

    /// Prefix image text to the retrieval query
    ///
    /// Called only when an image was attached; an image with no recognizable
    /// text still contributes an empty prefix.
    pub fn apply_image_text(&mut self, outcome: OcrOutcome) {
        self.retrieval_query = format!("{}\n\n{}", outcome.into_text(), self.question);
    }
}

/// Source attribution for one context passage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub title: String,
    pub url: Option<String>,
}

/// Final answer with sources in retrieval rank order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<SourceAttribution>,
}

impl AnswerResult {
    fn from_ranked(answer: String, passages: &[ScoredPassage]) -> Self {
        let sources = passages
            .iter()
            .map(|p| SourceAttribution {
                title: p.record.metadata.title.clone(),
                url: p.record.metadata.original_url.clone(),
            })
            .collect();

        Self { answer, sources }
    }
}

/// Entry point for answering questions
pub struct QueryOrchestrator {
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    corpus: Arc<dyn PassageSource>,
    synthesizer: Arc<dyn AnswerSynthesizer>,
    ranker: Ranker,
}

impl QueryOrchestrator {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        corpus: Arc<dyn PassageSource>,
        synthesizer: Arc<dyn AnswerSynthesizer>,
        ranker: Ranker,
    ) -> Self {
        info!(
            embedding_model = embedder.model_name(),
            completion_model = synthesizer.model_name(),
            top_k = ranker.top_k(),
            "Query orchestrator ready"
        );

        Self {
            extractor,
            embedder,
            corpus,
            synthesizer,
            ranker,
        }
    }

    /// Build every component from configuration around `corpus`
    pub fn from_config(config: &AppConfig, corpus: Arc<dyn PassageSource>) -> Result<Self> {
        Ok(Self::new(
            create_extractor(&config.ocr, config.ocr_timeout()),
            create_embedder(config)?,
            corpus,
            create_synthesizer(config)?,
            Ranker::new(config.retrieval.top_k),
        ))
    }

    pub fn corpus(&self) -> &Arc<dyn PassageSource> {
        &self.corpus
    }

    /// Answer one question
    pub async fn answer(&self, input: QueryInput) -> Result<AnswerResult> {
        let start = Instant::now();
        let query_id = Uuid::new_v4();
        let with_image = input.image.is_some();
        let mut stage = QueryStage::ValidatingInput;

        let span = info_span!("query", %query_id);
        let result = self
            .run(query_id, input, &mut stage)
            .instrument(span.clone())
            .await;

        span.in_scope(|| match &result {
            Ok(answer) => {
                metrics::record_query(start.elapsed().as_secs_f64(), with_image);
                info!(
                    sources = answer.sources.len(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Query answered"
                );
            }
            Err(e) => {
                metrics::record_query_failure(stage.as_str());
                error!(stage = stage.as_str(), error = %e, "Query failed");
            }
        });

        result
    }

    async fn run(
        &self,
        query_id: Uuid,
        input: QueryInput,
        stage: &mut QueryStage,
    ) -> Result<AnswerResult> {
        let mut ctx = QueryContext::new(query_id, input)?;
        debug!(has_image = ctx.image.is_some(), "Query accepted");

        if let Some(image) = ctx.image.clone() {
            advance(stage, QueryStage::ExtractingImageText);
            debug!(payload_len = image.as_base64().len(), "Extracting image text");
            let outcome = extract_payload(self.extractor.as_ref(), &image).await;
            ctx.apply_image_text(outcome);
        }

        advance(stage, QueryStage::Embedding);
        let query_vector = self.embedder.embed(&ctx.retrieval_query).await?;

        advance(stage, QueryStage::Ranking);
        let records = self.corpus.load_all().await?;
        let ranked = self.ranker.rank(&query_vector, records)?;
        debug!(
            ranked = ranked.len(),
            top_score = ranked.first().map(|p| p.score),
            "Passages ranked"
        );

        advance(stage, QueryStage::Synthesizing);
        let answer = self.synthesizer.synthesize(&ctx.answer_query, &ranked).await?;

        advance(stage, QueryStage::Responding);
        Ok(AnswerResult::from_ranked(answer, &ranked))
    }
}

fn advance(stage: &mut QueryStage, next: QueryStage) {
    *stage = next;
    debug!(stage = next.as_str(), "Entering stage");
}
