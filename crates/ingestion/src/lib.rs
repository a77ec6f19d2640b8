//! Reef Ingestion
//!
//! Turns uploaded files into normalized plain text for the search and
//! synthesis pipelines.

pub mod document;
pub mod errors;

pub use document::{
    extract_text, normalize_text, BoundedBuffer, DocumentKind, MAX_DOCUMENT_BYTES,
};
pub use errors::DocumentError;
