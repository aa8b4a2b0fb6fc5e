//! Error types for askdocs services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each pipeline failure mode
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling
//!
//! Image text extraction has no variant here: OCR failures degrade to
//! "no text" inside the `ocr` module.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,
    UnsupportedMediaType,

    // Corpus errors (7xxx)
    CorpusReadError,
    DimensionMismatch,

    // External service errors (8xxx)
    EmbeddingFailure,
    SynthesisFailure,

    // Startup errors (9xxx)
    ConfigurationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,
            ErrorCode::UnsupportedMediaType => 1004,

            // Corpus (7xxx)
            ErrorCode::CorpusReadError => 7001,
            ErrorCode::DimensionMismatch => 7002,

            // External (8xxx)
            ErrorCode::EmbeddingFailure => 8001,
            ErrorCode::SynthesisFailure => 8002,

            // Startup (9xxx)
            ErrorCode::ConfigurationError => 9001,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Missing '{field}'")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Unsupported content type: {content_type}")]
    UnsupportedMediaType { content_type: String },

    // Corpus errors
    #[error("Corpus read failed: {message}")]
    CorpusRead { message: String },

    #[error("Embedding dimension mismatch for record {record_id}: query has {expected}, record has {found}")]
    DimensionMismatch {
        record_id: i64,
        expected: usize,
        found: usize,
    },

    // External service errors
    #[error("Failed to get embedding: {message}")]
    EmbeddingFailure { message: String },

    #[error("Failed to generate answer: {message}")]
    SynthesisFailure { message: String },

    // Startup errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::UnsupportedMediaType { .. } => ErrorCode::UnsupportedMediaType,
            AppError::CorpusRead { .. } => ErrorCode::CorpusReadError,
            AppError::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            AppError::EmbeddingFailure { .. } => ErrorCode::EmbeddingFailure,
            AppError::SynthesisFailure { .. } => ErrorCode::SynthesisFailure,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 415 Unsupported Media Type
            AppError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,

            // 422 Unprocessable Entity
            AppError::MissingField { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 500 Internal Server Error
            AppError::CorpusRead { .. } |
            AppError::DimensionMismatch { .. } |
            AppError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingFailure { .. } |
            AppError::SynthesisFailure { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match self {
            AppError::Validation { field, .. } => field,
            AppError::MissingField { field } => Some(field),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::CorpusRead {
            message: err.to_string(),
        }
    }
}
