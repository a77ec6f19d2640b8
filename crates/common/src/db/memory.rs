//! In-process `Store`
//!
//! Backs tests and local runs without Postgres. A single mutex guards all
//! tables, which gives every operation the same all-or-nothing behaviour the
//! repository gets from conditional updates and transactions.

use crate::db::models::{CreditPurchase, Paper, Profile, Search};
use crate::db::store::{
    DebitOutcome, GrantOutcome, NewProfile, NewSearch, PaperMatch, PurchaseRecord, Store,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    profiles: HashMap<Uuid, Profile>,
    searches: Vec<(Search, Vec<f32>)>,
    papers: Vec<(Paper, Vec<f32>)>,
    purchases: HashMap<String, CreditPurchase>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_vector_search: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| AppError::Internal {
            message: "memory store lock poisoned".to_string(),
        })
    }

    /// Builder: seed a profile
    pub fn with_profile(self, user_id: Uuid, credits: i32, whitelisted: bool) -> Self {
        self.insert_profile(user_id, credits, whitelisted);
        self
    }

    pub fn insert_profile(&self, user_id: Uuid, credits: i32, whitelisted: bool) {
        let now = Utc::now().into();
        if let Ok(mut tables) = self.lock() {
            tables.profiles.insert(
                user_id,
                Profile {
                    id: user_id,
                    email: None,
                    full_name: None,
                    credits_remaining: credits,
                    whitelisted,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
    }

    /// Add a corpus paper with its embedding
    pub fn add_paper(&self, paper: Paper, embedding: Vec<f32>) {
        if let Ok(mut tables) = self.lock() {
            tables.papers.push((paper, embedding));
        }
    }

    /// Make `match_papers` fail, as if the vector index were unavailable
    pub fn set_fail_vector_search(&self, fail: bool) {
        self.fail_vector_search.store(fail, Ordering::SeqCst);
    }

    pub fn balance(&self, user_id: Uuid) -> Option<i32> {
        self.lock()
            .ok()?
            .profiles
            .get(&user_id)
            .map(|p| p.credits_remaining)
    }

    pub fn search_count(&self) -> usize {
        self.lock().map(|t| t.searches.len()).unwrap_or(0)
    }

    pub fn purchase_count(&self) -> usize {
        self.lock().map(|t| t.purchases.len()).unwrap_or(0)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        Ok(self.lock()?.profiles.get(&user_id).cloned())
    }

    async fn ensure_profile(&self, new: NewProfile) -> Result<Profile> {
        let mut tables = self.lock()?;
        let now = Utc::now().into();
        let profile = tables.profiles.entry(new.id).or_insert_with(|| Profile {
            id: new.id,
            email: new.email,
            full_name: None,
            credits_remaining: new.credits,
            whitelisted: new.whitelisted,
            created_at: now,
            updated_at: now,
        });
        Ok(profile.clone())
    }

    async fn try_debit(&self, user_id: Uuid, amount: i32) -> Result<DebitOutcome> {
        let mut tables = self.lock()?;
        let Some(profile) = tables.profiles.get_mut(&user_id) else {
            return Ok(DebitOutcome::ProfileMissing);
        };
        if profile.credits_remaining < amount {
            return Ok(DebitOutcome::Insufficient {
                available: profile.credits_remaining,
            });
        }
        profile.credits_remaining -= amount;
        profile.updated_at = Utc::now().into();
        Ok(DebitOutcome::Debited {
            balance: profile.credits_remaining,
        })
    }

    async fn credit(&self, user_id: Uuid, amount: i32) -> Result<Option<i32>> {
        let mut tables = self.lock()?;
        Ok(tables.profiles.get_mut(&user_id).map(|profile| {
            profile.credits_remaining += amount;
            profile.updated_at = Utc::now().into();
            profile.credits_remaining
        }))
    }

    async fn insert_search(&self, search: NewSearch) -> Result<Search> {
        let record = Search {
            id: search.id,
            user_id: search.user_id,
            title: Some(search.title),
            abstract_text: search.abstract_text,
            created_at: Utc::now().into(),
        };
        self.lock()?
            .searches
            .push((record.clone(), search.embedding));
        Ok(record)
    }

    async fn find_search_for_owner(&self, id: Uuid, user_id: Uuid) -> Result<Option<Search>> {
        Ok(self
            .lock()?
            .searches
            .iter()
            .find(|(s, _)| s.id == id && s.user_id == user_id)
            .map(|(s, _)| s.clone()))
    }

    async fn list_searches(&self, user_id: Uuid, limit: u64) -> Result<Vec<Search>> {
        let tables = self.lock()?;
        // Later inserts first, so equal timestamps still come out newest first
        let mut searches: Vec<Search> = tables
            .searches
            .iter()
            .rev()
            .filter(|(s, _)| s.user_id == user_id)
            .map(|(s, _)| s.clone())
            .collect();
        searches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        searches.truncate(limit as usize);
        Ok(searches)
    }

    async fn match_papers(
        &self,
        search_id: Uuid,
        threshold: f64,
        count: u32,
    ) -> Result<Vec<PaperMatch>> {
        if self.fail_vector_search.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseConnection {
                message: "vector search unavailable".to_string(),
            });
        }

        let started = Instant::now();
        let tables = self.lock()?;
        let Some((_, query)) = tables.searches.iter().find(|(s, _)| s.id == search_id) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<PaperMatch> = tables
            .papers
            .iter()
            .map(|(paper, embedding)| (paper, cosine_similarity(query, embedding)))
            .filter(|(_, similarity)| *similarity > threshold)
            .map(|(paper, similarity)| PaperMatch {
                id: paper.id,
                arxiv_id: paper.arxiv_id.clone(),
                title: paper.title.clone(),
                abstract_text: paper.abstract_text.clone(),
                authors: paper.authors.clone(),
                publish_date: paper.publish_date.clone(),
                doi: paper.doi.clone(),
                journal_ref: paper.journal_ref.clone(),
                similarity,
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(count as usize);

        crate::metrics::record_vector_search(started.elapsed().as_secs_f64());
        Ok(matches)
    }

    async fn find_papers_by_arxiv_ids(&self, arxiv_ids: &[String]) -> Result<Vec<Paper>> {
        Ok(self
            .lock()?
            .papers
            .iter()
            .filter(|(p, _)| {
                p.arxiv_id
                    .as_ref()
                    .is_some_and(|id| arxiv_ids.contains(id))
            })
            .map(|(p, _)| p.clone())
            .collect())
    }

    async fn grant_purchase(&self, purchase: &PurchaseRecord) -> Result<GrantOutcome> {
        let mut tables = self.lock()?;
        if tables.purchases.contains_key(&purchase.stripe_session_id) {
            return Ok(GrantOutcome::AlreadyProcessed);
        }

        let now = Utc::now().into();
        let Some(profile) = tables.profiles.get_mut(&purchase.user_id) else {
            return Ok(GrantOutcome::ProfileMissing);
        };
        profile.credits_remaining += purchase.credits;
        profile.updated_at = now;
        let balance = profile.credits_remaining;

        tables.purchases.insert(
            purchase.stripe_session_id.clone(),
            CreditPurchase {
                id: Uuid::now_v7(),
                user_id: purchase.user_id,
                stripe_session_id: purchase.stripe_session_id.clone(),
                credits_added: purchase.credits,
                amount_paid: purchase.amount_paid,
                created_at: now,
            },
        );
        Ok(GrantOutcome::Granted { balance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(id: i64, arxiv_id: &str) -> Paper {
        Paper {
            id,
            arxiv_id: Some(arxiv_id.to_string()),
            title: Some(format!("Paper {}", id)),
            abstract_text: Some("abstract".to_string()),
            authors: None,
            publish_date: None,
            doi: None,
            journal_ref: None,
        }
    }

    #[tokio::test]
    async fn test_try_debit_is_conditional() {
        let user = Uuid::new_v4();
        let store = MemoryStore::new().with_profile(user, 1, true);

        assert_eq!(
            store.try_debit(user, 1).await.unwrap(),
            DebitOutcome::Debited { balance: 0 }
        );
        assert_eq!(
            store.try_debit(user, 1).await.unwrap(),
            DebitOutcome::Insufficient { available: 0 }
        );
        assert_eq!(
            store.try_debit(Uuid::new_v4(), 1).await.unwrap(),
            DebitOutcome::ProfileMissing
        );
        assert_eq!(store.balance(user), Some(0));
    }

    #[tokio::test]
    async fn test_grant_purchase_once_per_session() {
        let user = Uuid::new_v4();
        let store = MemoryStore::new().with_profile(user, 0, true);
        let record = PurchaseRecord {
            user_id: user,
            stripe_session_id: "cs_test_1".to_string(),
            credits: 50,
            amount_paid: Some(2000),
        };

        assert_eq!(
            store.grant_purchase(&record).await.unwrap(),
            GrantOutcome::Granted { balance: 50 }
        );
        assert_eq!(
            store.grant_purchase(&record).await.unwrap(),
            GrantOutcome::AlreadyProcessed
        );
        assert_eq!(store.balance(user), Some(50));
        assert_eq!(store.purchase_count(), 1);
    }

    #[tokio::test]
    async fn test_grant_purchase_without_profile_writes_nothing() {
        let store = MemoryStore::new();
        let record = PurchaseRecord {
            user_id: Uuid::new_v4(),
            stripe_session_id: "cs_test_2".to_string(),
            credits: 10,
            amount_paid: None,
        };

        assert_eq!(
            store.grant_purchase(&record).await.unwrap(),
            GrantOutcome::ProfileMissing
        );
        assert_eq!(store.purchase_count(), 0);
    }

    #[tokio::test]
    async fn test_match_papers_orders_by_similarity() {
        let user = Uuid::new_v4();
        let store = MemoryStore::new();
        store.add_paper(paper(1, "a"), vec![1.0, 0.0]);
        store.add_paper(paper(2, "b"), vec![0.7, 0.7]);
        store.add_paper(paper(3, "c"), vec![-1.0, 0.0]);

        let search_id = Uuid::new_v4();
        store
            .insert_search(NewSearch {
                id: search_id,
                user_id: user,
                title: "T".into(),
                abstract_text: "A".into(),
                embedding: vec![1.0, 0.1],
            })
            .await
            .unwrap();

        let matches = store.match_papers(search_id, 0.0, 10).await.unwrap();
        let ids: Vec<i64> = matches.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(matches[0].similarity >= matches[1].similarity);

        let limited = store.match_papers(search_id, 0.0, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_search_lookup_is_owner_scoped() {
        let owner = Uuid::new_v4();
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store
            .insert_search(NewSearch {
                id,
                user_id: owner,
                title: "T".into(),
                abstract_text: "A".into(),
                embedding: vec![1.0],
            })
            .await
            .unwrap();

        assert!(store.find_search_for_owner(id, owner).await.unwrap().is_some());
        assert!(store
            .find_search_for_owner(id, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }
}
