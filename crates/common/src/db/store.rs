//! Persistence seam
//!
//! Every component that reads or mutates durable state goes through `Store`.
//! `Repository` implements it over Postgres; `MemoryStore` implements it in
//! process for tests and local runs. Implementations must keep the same
//! atomicity guarantees: `try_debit` is a single conditional decrement and
//! `grant_purchase` inserts the purchase row and increments the balance as
//! one unit, keyed on the session id.

use crate::db::models::{Paper, Profile, Search};
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Values for a lazily created profile
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: Option<String>,
    pub credits: i32,
    pub whitelisted: bool,
}

/// Outcome of an atomic conditional decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Balance was decremented; carries the new balance
    Debited { balance: i32 },
    /// The profile exists but holds fewer credits than requested
    Insufficient { available: i32 },
    ProfileMissing,
}

/// A search record ready to be persisted
#[derive(Debug, Clone)]
pub struct NewSearch {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub abstract_text: String,
    pub embedding: Vec<f32>,
}

/// One row returned by `match_papers`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMatch {
    pub id: i64,
    pub arxiv_id: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub authors: Option<String>,
    pub publish_date: Option<String>,
    pub doi: Option<String>,
    pub journal_ref: Option<String>,
    pub similarity: f64,
}

/// A verified purchase waiting to be granted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRecord {
    pub user_id: Uuid,
    pub stripe_session_id: String,
    pub credits: i32,
    pub amount_paid: Option<i32>,
}

/// Outcome of the durable idempotency gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Purchase row inserted and balance incremented
    Granted { balance: i32 },
    /// A purchase row for this session already existed; nothing changed
    AlreadyProcessed,
    /// The buyer has no profile; nothing was written
    ProfileMissing,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Check connectivity
    async fn ping(&self) -> Result<()>;

    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>>;

    /// Return the profile, creating it from `new` when absent
    async fn ensure_profile(&self, new: NewProfile) -> Result<Profile>;

    /// Decrement the balance by `amount` only if it stays non-negative
    async fn try_debit(&self, user_id: Uuid, amount: i32) -> Result<DebitOutcome>;

    /// Increment the balance; `None` when the profile does not exist
    async fn credit(&self, user_id: Uuid, amount: i32) -> Result<Option<i32>>;

    async fn insert_search(&self, search: NewSearch) -> Result<Search>;

    /// Ownership-scoped lookup; a record owned by someone else is `None`
    async fn find_search_for_owner(&self, id: Uuid, user_id: Uuid) -> Result<Option<Search>>;

    /// Newest first
    async fn list_searches(&self, user_id: Uuid, limit: u64) -> Result<Vec<Search>>;

    /// Nearest papers to the stored embedding of `search_id`, most similar first
    async fn match_papers(
        &self,
        search_id: Uuid,
        threshold: f64,
        count: u32,
    ) -> Result<Vec<PaperMatch>>;

    async fn find_papers_by_arxiv_ids(&self, arxiv_ids: &[String]) -> Result<Vec<Paper>>;

    /// Insert the purchase row and credit the buyer, at most once per session
    async fn grant_purchase(&self, purchase: &PurchaseRecord) -> Result<GrantOutcome>;
}

/// Render a vector as a pgvector literal: `[0.1,0.2,...]`
pub fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_paper_match_serializes_abstract_key() {
        let row = PaperMatch {
            id: 7,
            arxiv_id: Some("2401.00001".into()),
            title: Some("A".into()),
            abstract_text: Some("B".into()),
            authors: None,
            publish_date: None,
            doi: None,
            journal_ref: None,
            similarity: 0.9,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["abstract"], "B");
        assert!(json.get("abstract_text").is_none());
    }
}
