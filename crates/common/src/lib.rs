//! Reef Common Library
//!
//! Shared code for the Reef services including:
//! - Configuration management
//! - Error types and HTTP mapping
//! - Authentication (bearer JWTs from the auth provider)
//! - Persistence (SeaORM entities, `Store` trait, Postgres and in-memory stores)
//! - Embedding and chat-model clients
//! - Credit ledger, credit packages, payment provider and reconciler
//! - The Reef search pipeline and the Pearl synthesis pipeline
//! - Metrics and observability

pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod pearl;
pub mod reef;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{MemoryStore, Repository, Store};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::LanguageModel;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
