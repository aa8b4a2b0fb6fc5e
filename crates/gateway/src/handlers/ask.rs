//! Question answering handler
//!
//! `POST /api` accepts either a JSON body or a multipart form. The content
//! type decides which parser runs; anything else is rejected before the body
//! is read.

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

use crate::AppState;
use askdocs_common::{
    errors::{AppError, Result},
    ocr::ImagePayload,
    pipeline::{AnswerResult, QueryInput, SourceAttribution},
};

/// Upper bound on question length, in characters
pub const MAX_QUESTION_LEN: u64 = 8_000;

/// JSON request body
#[derive(Debug, Default, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(max = MAX_QUESTION_LEN))]
    #[serde(default)]
    pub question: Option<String>,

    /// Base64-encoded image
    #[serde(default)]
    pub image: Option<String>,
}

impl From<AskRequest> for QueryInput {
    fn from(request: AskRequest) -> Self {
        QueryInput {
            question: request.question,
            image: request.image.and_then(ImagePayload::from_base64),
        }
    }
}

/// Answer response
#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<SourceAttribution>,

    /// Titles in rank order, mirrors `sources`
    pub source_titles: Vec<String>,

    /// URLs in rank order, mirrors `sources`
    pub original_urls: Vec<Option<String>>,
}

impl From<AnswerResult> for AskResponse {
    fn from(result: AnswerResult) -> Self {
        let source_titles = result.sources.iter().map(|s| s.title.clone()).collect();
        let original_urls = result.sources.iter().map(|s| s.url.clone()).collect();

        Self {
            answer: result.answer,
            sources: result.sources,
            source_titles,
            original_urls,
        }
    }
}

enum BodyKind {
    Json,
    Multipart,
}

fn body_kind(request: &Request) -> Result<BodyKind> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "application/json" => Ok(BodyKind::Json),
        "multipart/form-data" => Ok(BodyKind::Multipart),
        _ => Err(AppError::UnsupportedMediaType {
            content_type: if content_type.is_empty() {
                "<none>".to_string()
            } else {
                content_type.to_string()
            },
        }),
    }
}

async fn parse_json(request: Request, state: &AppState) -> Result<AskRequest> {
    let body = Bytes::from_request(request, state)
        .await
        .map_err(|e| AppError::InvalidFormat {
            message: e.body_text(),
        })?;

    let parsed: AskRequest = serde_json::from_slice(&body).map_err(|e| AppError::InvalidFormat {
        message: format!("Invalid JSON body: {}", e),
    })?;

    parsed.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("question".to_string()),
    })?;

    Ok(parsed)
}

async fn parse_multipart(request: Request, state: &AppState) -> Result<QueryInput> {
    let invalid = |message: String| AppError::InvalidFormat { message };

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| invalid(e.body_text()))?;

    let mut input = QueryInput::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "question" => {
                let text = field.text().await.map_err(|e| invalid(e.body_text()))?;
                if text.chars().count() as u64 > MAX_QUESTION_LEN {
                    return Err(AppError::Validation {
                        message: format!("question exceeds {} characters", MAX_QUESTION_LEN),
                        field: Some("question".to_string()),
                    });
                }
                input.question = Some(text);
            }
            "image" => {
                let bytes = field.bytes().await.map_err(|e| invalid(e.body_text()))?;
                input.image = ImagePayload::from_bytes(&bytes);
            }
            other => debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    Ok(input)
}

/// Answer a question, optionally using text from an attached image
pub async fn ask(State(state): State<AppState>, request: Request) -> Result<Json<AskResponse>> {
    let input = match body_kind(&request)? {
        BodyKind::Json => parse_json(request, &state).await?.into(),
        BodyKind::Multipart => parse_multipart(request, &state).await?,
    };

    let result = state.orchestrator.answer(input).await?;

    Ok(Json(result.into()))
}
