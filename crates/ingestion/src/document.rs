//! Uploaded document text extraction
//!
//! Plain text is decoded as lossy UTF-8. PDFs go through `pdf-extract` on the
//! blocking pool. Word formats are recognized only to return a clearer
//! message than the generic unsupported-type one.

use crate::errors::DocumentError;
use regex_lite::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Upload ceiling, enforced while the body streams in
pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

const DOC_MIME: &str = "application/msword";
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Pdf,
}

impl DocumentKind {
    /// Classify a MIME type; parameters such as `; charset=utf-8` are ignored
    pub fn from_mime(content_type: &str) -> Result<Self, DocumentError> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "text/plain" => Ok(DocumentKind::PlainText),
            "application/pdf" => Ok(DocumentKind::Pdf),
            DOC_MIME | DOCX_MIME => Err(DocumentError::WordNotSupported),
            _ => Err(DocumentError::UnsupportedType {
                content_type: content_type.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::PlainText => "text",
            DocumentKind::Pdf => "pdf",
        }
    }
}

/// Accumulates upload chunks and fails as soon as the ceiling is crossed
#[derive(Debug)]
pub struct BoundedBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl BoundedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), DocumentError> {
        if self.bytes.len() + chunk.len() > self.limit {
            return Err(DocumentError::TooLarge { limit: self.limit });
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

fn blank_runs() -> &'static Regex {
    static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
    BLANK_RUNS.get_or_init(|| Regex::new(r"\n{3,}").expect("static pattern"))
}

/// CRLF to LF, collapse 3+ newlines to one blank line, trim
pub fn normalize_text(text: &str) -> String {
    let unix = text.replace("\r\n", "\n");
    blank_runs().replace_all(&unix, "\n\n").trim().to_string()
}

fn extract_pdf(bytes: &[u8]) -> Result<String, DocumentError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
        warn!(error = %e, "PDF extraction failed");
        DocumentError::ParseFailure {
            detail: e.to_string(),
        }
    })
}

/// Extract and normalize the text of an uploaded file
pub async fn extract_text(content_type: &str, bytes: Vec<u8>) -> Result<String, DocumentError> {
    let kind = DocumentKind::from_mime(content_type)?;
    if bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(DocumentError::TooLarge {
            limit: MAX_DOCUMENT_BYTES,
        });
    }

    let raw = match kind {
        DocumentKind::PlainText => String::from_utf8_lossy(&bytes).into_owned(),
        DocumentKind::Pdf => tokio::task::spawn_blocking(move || extract_pdf(&bytes))
            .await
            .map_err(|e| DocumentError::ParseFailure {
                detail: format!("extraction task failed: {}", e),
            })??,
    };

    let text = normalize_text(&raw);
    if text.is_empty() {
        return Err(DocumentError::Empty);
    }

    debug!(kind = kind.as_str(), chars = text.len(), "Document text extracted");
    Ok(text)
}
