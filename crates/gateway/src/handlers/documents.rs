//! Document upload handler

use crate::middleware::rate_limit::EndpointClass;
use crate::AppState;
use axum::{
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        State,
    },
    http::{HeaderMap, StatusCode},
    Json,
};
use reef_common::{
    auth::AuthUser,
    errors::{AppError, Result},
    metrics,
};
use reef_ingestion::{BoundedBuffer, DocumentError, DocumentKind, MAX_DOCUMENT_BYTES};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ParsedDocument {
    pub text: String,
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DocumentError::TooLarge {
            limit: MAX_DOCUMENT_BYTES,
        }
        .into()
    } else {
        AppError::validation("file", err.body_text())
    }
}

/// Stream the `file` field into memory, stopping at the size ceiling
async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Vec<u8>)> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        // Reject unsupported types before reading the body
        DocumentKind::from_mime(&content_type)?;

        let mut buffer = BoundedBuffer::new(MAX_DOCUMENT_BYTES);
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            buffer.push(&chunk)?;
        }
        return Ok((content_type, buffer.into_inner()));
    }

    Err(DocumentError::MissingFile.into())
}

/// Extract plain text from an uploaded PDF or text file
pub async fn parse_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthUser,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<ParsedDocument>> {
    state
        .rate_limit(EndpointClass::ParseDocument, &auth, &headers)
        .await?;

    let mut multipart = multipart.map_err(|e| AppError::validation("file", e.body_text()))?;
    let (content_type, bytes) = read_file_field(&mut multipart).await?;
    let size = bytes.len();

    let kind = DocumentKind::from_mime(&content_type)
        .map(|k| k.as_str())
        .unwrap_or("unsupported");
    let result = reef_ingestion::extract_text(&content_type, bytes).await;
    metrics::record_document(kind, result.is_ok());
    let text = result?;

    tracing::info!(user_id = %auth.user_id, kind, size, chars = text.len(), "Document parsed");
    Ok(Json(ParsedDocument { text }))
}
