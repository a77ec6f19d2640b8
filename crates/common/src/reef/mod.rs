//! Reef: abstract-to-papers search
//!
//! `create_search` runs the paid pipeline: validate, reserve a credit, embed,
//! title, persist, then settle the reservation. A failure anywhere after the
//! reservation refunds it. `search_results` is free and ownership-scoped.

use crate::billing::CreditLedger;
use crate::db::models::Search;
use crate::db::{NewSearch, PaperMatch, Store};
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::llm::{ChatRequest, LanguageModel, Purpose};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Longest abstract accepted, in characters
pub const MAX_ABSTRACT_CHARS: usize = 50_000;

/// `match_papers` defaults
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.0;
pub const DEFAULT_MATCH_COUNT: u32 = 10;

/// Search history page bounds
pub const DEFAULT_HISTORY_LIMIT: u64 = 10;
pub const MAX_HISTORY_LIMIT: u64 = 100;

const TITLE_SYSTEM_PROMPT: &str = "You generate short titles for research abstracts. \
Reply with a 2-3 word title that captures the main topic and nothing else.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSearch {
    pub search_id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub search: Search,
    pub papers: Vec<PaperMatch>,
}

pub struct ReefService {
    store: Arc<dyn Store>,
    ledger: CreditLedger,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    search_cost: i32,
}

/// Trim and bound-check an abstract or research idea
pub fn validate_abstract(field: &str, text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(field, format!("{} is required", field)));
    }
    if trimmed.chars().count() > MAX_ABSTRACT_CHARS {
        return Err(AppError::validation(
            field,
            format!("{} must be at most {} characters", field, MAX_ABSTRACT_CHARS),
        ));
    }
    Ok(trimmed.to_string())
}

/// Strip whitespace and surrounding quotes from a model-written title
pub fn clean_title(raw: &str) -> String {
    let cleaned = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '`'))
        .trim();
    if cleaned.is_empty() {
        "Untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

impl ReefService {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        search_cost: i32,
    ) -> Self {
        Self {
            ledger: CreditLedger::new(store.clone()),
            store,
            embedder,
            llm,
            search_cost,
        }
    }

    /// Reject profiles that are missing or not whitelisted
    pub async fn ensure_whitelisted(&self, user_id: Uuid) -> Result<()> {
        match self.store.find_profile(user_id).await? {
            Some(profile) if profile.whitelisted => Ok(()),
            _ => Err(AppError::NotWhitelisted),
        }
    }

    #[tracing::instrument(skip(self, abstract_text), fields(chars = abstract_text.len()))]
    pub async fn create_search(&self, user_id: Uuid, abstract_text: &str) -> Result<CreatedSearch> {
        let abstract_text = validate_abstract("abstract", abstract_text)?;

        let reservation = self
            .ledger
            .reserve(user_id, self.search_cost, "search")
            .await?;
        let result = self.embed_and_persist(user_id, abstract_text).await;
        let search = reservation.settle(result).await?;

        crate::metrics::record_search_created();
        tracing::info!(search_id = %search.id, %user_id, "Search created");

        Ok(CreatedSearch {
            search_id: search.id,
            message: "Search saved successfully".to_string(),
        })
    }

    async fn embed_and_persist(&self, user_id: Uuid, abstract_text: String) -> Result<Search> {
        let embedding = self.embedder.embed(&abstract_text).await?;
        if embedding.len() != self.embedder.dimension() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "expected {} dimensions from {}, got {}",
                    self.embedder.dimension(),
                    self.embedder.model_name(),
                    embedding.len()
                ),
            });
        }

        let title = self.generate_title(&abstract_text).await?;

        self.store
            .insert_search(NewSearch {
                id: Uuid::now_v7(),
                user_id,
                title,
                abstract_text,
                embedding,
            })
            .await
    }

    async fn generate_title(&self, abstract_text: &str) -> Result<String> {
        let reply = self
            .llm
            .complete(&ChatRequest {
                purpose: Purpose::Title,
                system: TITLE_SYSTEM_PROMPT.to_string(),
                user: format!("Generate a title for this abstract:\n\n{}", abstract_text),
                max_tokens: 20,
                temperature: 0.7,
                json: false,
            })
            .await?;
        Ok(clean_title(&reply))
    }

    /// Owner-only: the search and its nearest papers
    #[tracing::instrument(skip(self))]
    pub async fn search_results(&self, user_id: Uuid, search_id: Uuid) -> Result<SearchResults> {
        self.ensure_whitelisted(user_id).await?;

        let search = self
            .store
            .find_search_for_owner(search_id, user_id)
            .await?
            .ok_or(AppError::SearchNotFound)?;

        let papers = self
            .store
            .match_papers(search.id, DEFAULT_MATCH_THRESHOLD, DEFAULT_MATCH_COUNT)
            .await?;

        tracing::debug!(papers = papers.len(), "Vector search complete");
        Ok(SearchResults { search, papers })
    }

    /// The caller's searches, newest first
    pub async fn list_searches(&self, user_id: Uuid, limit: Option<u64>) -> Result<Vec<Search>> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        self.store.list_searches(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Paper;
    use crate::db::MemoryStore;
    use crate::embeddings::MockEmbedder;
    use crate::llm::MockLanguageModel;

    const DIM: usize = 16;

    fn service(store: Arc<MemoryStore>, embedder: MockEmbedder) -> ReefService {
        ReefService::new(
            store,
            Arc::new(embedder),
            Arc::new(MockLanguageModel::canned()),
            1,
        )
    }

    fn corpus_paper(id: i64, text: &str) -> Paper {
        Paper {
            id,
            arxiv_id: Some(format!("2401.{:05}", id)),
            title: Some(format!("Paper {}", id)),
            abstract_text: Some(text.to_string()),
            authors: None,
            publish_date: Some("2024-01-01".to_string()),
            doi: None,
            journal_ref: None,
        }
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"Graph Learning\"\n"), "Graph Learning");
        assert_eq!(clean_title("“Protein Folding”"), "Protein Folding");
        assert_eq!(clean_title("\"\""), "Untitled");
        assert_eq!(clean_title(""), "Untitled");
    }

    #[test]
    fn test_validate_abstract() {
        assert!(validate_abstract("abstract", "   ").is_err());
        assert_eq!(validate_abstract("abstract", " x ").unwrap(), "x");
        let long = "a".repeat(MAX_ABSTRACT_CHARS + 1);
        assert!(validate_abstract("abstract", &long).is_err());
    }

    #[tokio::test]
    async fn test_create_search_charges_one_credit() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new().with_profile(user, 5, true));
        let reef = service(store.clone(), MockEmbedder::new(DIM));

        let created = reef.create_search(user, "Sparse attention").await.unwrap();
        assert_eq!(created.message, "Search saved successfully");
        assert_eq!(store.balance(user), Some(4));

        let history = reef.list_searches(user, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].title.as_deref(), Some("Sparse Graph Learning"));
    }

    #[tokio::test]
    async fn test_embedding_failure_refunds() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new().with_profile(user, 3, true));
        let reef = service(store.clone(), MockEmbedder::failing(DIM));

        let err = reef.create_search(user, "anything").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingError { .. }));
        assert_eq!(store.balance(user), Some(3));
        assert_eq!(store.search_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_credits_creates_nothing() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new().with_profile(user, 0, true));
        let reef = service(store.clone(), MockEmbedder::new(DIM));

        let err = reef.create_search(user, "anything").await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientCredits { .. }));
        assert_eq!(store.search_count(), 0);
    }

    #[tokio::test]
    async fn test_results_are_owner_scoped_and_ranked() {
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let store = Arc::new(
            MemoryStore::new()
                .with_profile(owner, 5, true)
                .with_profile(other, 5, true),
        );
        let embedder = MockEmbedder::new(DIM);
        store.add_paper(corpus_paper(1, "diffusion models"), embedder.vector_for("diffusion models"));
        let reef = service(store.clone(), MockEmbedder::new(DIM));

        let created = reef.create_search(owner, "diffusion models").await.unwrap();

        let results = reef.search_results(owner, created.search_id).await.unwrap();
        assert_eq!(results.papers[0].id, 1);
        assert!((results.papers[0].similarity - 1.0).abs() < 1e-6);

        assert!(matches!(
            reef.search_results(other, created.search_id).await,
            Err(AppError::SearchNotFound)
        ));
        assert!(matches!(
            reef.search_results(owner, Uuid::new_v4()).await,
            Err(AppError::SearchNotFound)
        ));
    }

    #[tokio::test]
    async fn test_results_require_whitelist() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new().with_profile(user, 5, false));
        let reef = service(store.clone(), MockEmbedder::new(DIM));

        let created = reef.create_search(user, "x").await.unwrap();
        assert!(matches!(
            reef.search_results(user, created.search_id).await,
            Err(AppError::NotWhitelisted)
        ));
    }

    #[tokio::test]
    async fn test_vector_failure_is_an_error() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new().with_profile(user, 5, true));
        let reef = service(store.clone(), MockEmbedder::new(DIM));
        let created = reef.create_search(user, "x").await.unwrap();

        store.set_fail_vector_search(true);
        let err = reef.search_results(user, created.search_id).await.unwrap_err();
        assert!(err.is_server_error());
    }
}
