//! Document ingestion error types

use reef_common::errors::AppError;
use thiserror::Error;

/// Every variant is a client-facing 400; the message is shown verbatim
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("No file provided")]
    MissingFile,

    #[error("Unsupported file type. Please upload a PDF, TXT, or DOC file.")]
    UnsupportedType { content_type: String },

    #[error("DOC/DOCX support coming soon. Please convert to PDF or paste text directly.")]
    WordNotSupported,

    #[error("File too large. Maximum size is 10MB.")]
    TooLarge { limit: usize },

    #[error("Failed to parse PDF. The file may be corrupted or password-protected.")]
    ParseFailure { detail: String },

    #[error("No text could be extracted from the file.")]
    Empty,
}

impl DocumentError {
    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentError::MissingFile => "missing_file",
            DocumentError::UnsupportedType { .. } => "unsupported_type",
            DocumentError::WordNotSupported => "word_not_supported",
            DocumentError::TooLarge { .. } => "too_large",
            DocumentError::ParseFailure { .. } => "parse_failure",
            DocumentError::Empty => "empty",
        }
    }
}

impl From<DocumentError> for AppError {
    fn from(e: DocumentError) -> Self {
        AppError::InvalidDocument {
            message: e.to_string(),
        }
    }
}
