//! Error types for Reef services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - `{ "error": ..., "code": ... }` response bodies
//! - Generic messages for server-side failures so upstream details never leak

use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    ValidationError,
    InvalidDocument,
    InvalidSignature,
    PaymentIncomplete,

    // Authentication errors
    Unauthorized,
    InvalidToken,
    ExpiredToken,

    // Authorization errors
    Forbidden,
    NotWhitelisted,

    // Resource errors
    NotFound,
    ProfileNotFound,
    SearchNotFound,

    // Billing errors
    InsufficientCredits,

    // Rate limiting
    RateLimited,

    // Database errors
    DatabaseError,
    ConnectionError,

    // External service errors
    UpstreamError,
    EmbeddingError,
    LlmError,
    PaymentProviderError,

    // Internal errors
    InternalError,
    ConfigurationError,
    SerializationError,
}

/// Pipeline stage reported alongside a failure of the Pearl synthesis chain
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Search,
    Extraction,
    Generation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::Extraction => "extraction",
            Stage::Generation => "generation",
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("{message}")]
    InvalidDocument { message: String },

    #[error("Invalid signature: {message}")]
    InvalidSignature { message: String },

    #[error("Payment not completed")]
    PaymentIncomplete,

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid access token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Account is not whitelisted for this product")]
    NotWhitelisted,

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Profile not found: {id}")]
    ProfileNotFound { id: String },

    /// Not-found and not-owner share this variant so existence never leaks
    #[error("Search record not found or access denied")]
    SearchNotFound,

    // Billing
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i32, available: i32 },

    // Rate limiting
    #[error("Too many requests. Please try again later.")]
    RateLimited {
        limit: u32,
        reset_at: DateTime<Utc>,
        retry_after_secs: u64,
    },

    /// Process-wide shedding; carries no per-client window
    #[error("Server is busy. Please try again later.")]
    Overloaded,

    // Pipeline stage wrapper
    #[error("{stage:?} stage failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<AppError>,
    },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Language model error: {message}")]
    LlmError { message: String },

    #[error("Payment provider error: {message}")]
    PaymentProvider { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation failure on a named field
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Wrap this error with the pipeline stage it came from
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            already @ AppError::StageFailed { .. } => already,
            other => AppError::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidDocument { .. } => ErrorCode::InvalidDocument,
            AppError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
            AppError::PaymentIncomplete => ErrorCode::PaymentIncomplete,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidToken => ErrorCode::InvalidToken,
            AppError::ExpiredToken => ErrorCode::ExpiredToken,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::NotWhitelisted => ErrorCode::NotWhitelisted,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::ProfileNotFound { .. } => ErrorCode::ProfileNotFound,
            AppError::SearchNotFound => ErrorCode::SearchNotFound,
            AppError::InsufficientCredits { .. } => ErrorCode::InsufficientCredits,
            AppError::RateLimited { .. } | AppError::Overloaded => ErrorCode::RateLimited,
            AppError::StageFailed { source, .. } => source.code(),
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::LlmError { .. } => ErrorCode::LlmError,
            AppError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::InvalidDocument { .. }
            | AppError::InvalidSignature { .. }
            | AppError::PaymentIncomplete => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } | AppError::InvalidToken | AppError::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }

            // 402 Payment Required
            AppError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,

            // 403 Forbidden
            AppError::Forbidden { .. } | AppError::NotWhitelisted => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::ProfileNotFound { .. }
            | AppError::SearchNotFound => StatusCode::NOT_FOUND,

            // 429 Too Many Requests
            AppError::RateLimited { .. } | AppError::Overloaded => StatusCode::TOO_MANY_REQUESTS,

            AppError::StageFailed { source, .. } => source.status_code(),

            // 500 Internal Server Error, upstream failures included
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::EmbeddingError { .. }
            | AppError::LlmError { .. }
            | AppError::PaymentProvider { .. }
            | AppError::HttpClient(_)
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
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

    /// Message shown to the client. Server errors get a fixed message per
    /// failure class; the detailed message is only logged.
    pub fn public_message(&self) -> String {
        match self {
            AppError::StageFailed { source, .. } => source.public_message(),
            AppError::InsufficientCredits { .. } => "Insufficient credits".to_string(),
            AppError::EmbeddingError { .. } => "Failed to create embedding".to_string(),
            AppError::LlmError { .. } => "Failed to generate a response".to_string(),
            AppError::PaymentProvider { .. } => "Payment provider request failed".to_string(),
            err if err.is_server_error() => "Internal server error".to_string(),
            err => err.to_string(),
        }
    }

    fn stage(&self) -> Option<Stage> {
        match self {
            AppError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let detail = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %detail,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %detail,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: self.public_message(),
            code,
            stage: self.stage(),
        };

        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimited {
            limit,
            reset_at,
            retry_after_secs,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
            headers.insert(
                "x-ratelimit-reset",
                HeaderValue::from(reset_at.timestamp_millis()),
            );
        }

        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation {
            message: rejection.body_text(),
            field: None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::SearchNotFound;
        assert_eq!(err.code(), ErrorCode::SearchNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("abstract", "Abstract is required");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
        assert_eq!(err.public_message(), "Abstract is required");
    }

    #[test]
    fn test_insufficient_credits_is_payment_required() {
        let err = AppError::InsufficientCredits {
            required: 1,
            available: 0,
        };
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.public_message(), "Insufficient credits");
    }

    #[test]
    fn test_upstream_details_are_hidden() {
        let err = AppError::EmbeddingError {
            message: "API error 401: invalid key sk-live-abc".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("sk-live"));

        let err = AppError::Internal {
            message: "connection reset".into(),
        };
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn test_stage_wrapping_keeps_inner_status() {
        let err = AppError::InsufficientCredits {
            required: 1,
            available: 0,
        }
        .at_stage(Stage::Extraction);
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.stage(), Some(Stage::Extraction));

        // Re-wrapping keeps the original stage
        let err = err.at_stage(Stage::Generation);
        assert_eq!(err.stage(), Some(Stage::Extraction));
    }

    #[test]
    fn test_rate_limited_response_headers() {
        let err = AppError::RateLimited {
            limit: 10,
            reset_at: Utc::now(),
            retry_after_secs: 42,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    }

    #[test]
    fn test_overloaded_is_bare_429() {
        let response = AppError::Overloaded.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
        assert!(response.headers().get("x-ratelimit-limit").is_none());
        assert!(response.headers().get("x-ratelimit-reset").is_none());
    }
}
