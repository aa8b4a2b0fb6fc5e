//! Health check handlers

use crate::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Message returned by `GET /`
pub const ROOT_MESSAGE: &str =
    "askdocs API running. Use POST /api with question and optional image.";

#[derive(Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize, Deserialize)]
pub struct HealthChecks {
    pub corpus: CheckResult,
}

#[derive(Serialize, Deserialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Static banner for anyone hitting the root
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: ROOT_MESSAGE.to_string(),
    })
}

/// Liveness check - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Readiness check - verifies the corpus can be opened
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let start = Instant::now();

    let corpus_check = match state.orchestrator.corpus().ping().await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    let all_healthy = corpus_check.status == "up";

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks {
            corpus: corpus_check,
        },
    })
}
