//! Repository pattern for database operations
//!
//! Postgres implementation of `Store`. Entity queries go through SeaORM;
//! balance mutations, vector columns and `match_papers` use raw statements
//! so each one stays a single atomic SQL operation.

use crate::db::models::*;
use crate::db::store::{
    vector_literal, DebitOutcome, GrantOutcome, NewProfile, NewSearch, PaperMatch,
    PurchaseRecord, Store,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, QueryResult, QuerySelect, Statement, TransactionTrait,
};
use std::time::Instant;
use uuid::Uuid;

/// Repository for data access operations
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    async fn current_balance(&self, user_id: Uuid) -> Result<Option<i32>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT credits_remaining FROM profiles WHERE id = $1",
            vec![user_id.into()],
        );

        match self.write_conn().query_one(stmt).await? {
            Some(row) => Ok(Some(row.try_get::<i32>("", "credits_remaining")?)),
            None => Ok(None),
        }
    }
}

fn paper_match_from_row(row: &QueryResult) -> Result<PaperMatch> {
    Ok(PaperMatch {
        id: row.try_get("", "id")?,
        arxiv_id: row.try_get("", "arxiv_id")?,
        title: row.try_get("", "title")?,
        abstract_text: row.try_get("", "abstract")?,
        authors: row.try_get("", "authors")?,
        publish_date: row.try_get("", "publish_date")?,
        doi: row.try_get("", "doi")?,
        journal_ref: row.try_get("", "journal_ref")?,
        similarity: row.try_get("", "similarity")?,
    })
}

#[async_trait]
impl Store for Repository {
    // ========================================================================
    // Health Check
    // ========================================================================

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Profile & Balance Operations
    // ========================================================================

    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        ProfileEntity::find_by_id(user_id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn ensure_profile(&self, new: NewProfile) -> Result<Profile> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO profiles (id, email, credits_remaining, whitelisted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
            vec![
                new.id.into(),
                new.email.into(),
                new.credits.into(),
                new.whitelisted.into(),
            ],
        );
        self.write_conn().execute(stmt).await?;

        // Read back from the primary so a fresh row is never missed on a lagging replica
        ProfileEntity::find_by_id(new.id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::ProfileNotFound {
                id: new.id.to_string(),
            })
    }

    async fn try_debit(&self, user_id: Uuid, amount: i32) -> Result<DebitOutcome> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE profiles
            SET credits_remaining = credits_remaining - $2, updated_at = NOW()
            WHERE id = $1 AND credits_remaining >= $2
            RETURNING credits_remaining
            "#,
            vec![user_id.into(), amount.into()],
        );

        if let Some(row) = self.write_conn().query_one(stmt).await? {
            let balance = row.try_get::<i32>("", "credits_remaining")?;
            return Ok(DebitOutcome::Debited { balance });
        }

        // No row updated: tell a missing profile apart from an empty wallet
        Ok(match self.current_balance(user_id).await? {
            Some(available) => DebitOutcome::Insufficient { available },
            None => DebitOutcome::ProfileMissing,
        })
    }

    async fn credit(&self, user_id: Uuid, amount: i32) -> Result<Option<i32>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE profiles
            SET credits_remaining = credits_remaining + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING credits_remaining
            "#,
            vec![user_id.into(), amount.into()],
        );

        match self.write_conn().query_one(stmt).await? {
            Some(row) => Ok(Some(row.try_get::<i32>("", "credits_remaining")?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Search Operations
    // ========================================================================

    async fn insert_search(&self, search: NewSearch) -> Result<Search> {
        // Use raw SQL for pgvector type
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO reef_searches (id, user_id, embedding, title, abstract, created_at)
            VALUES ($1, $2, $3::vector, $4, $5, NOW())
            RETURNING id, user_id, title, abstract, created_at
            "#,
            vec![
                search.id.into(),
                search.user_id.into(),
                vector_literal(&search.embedding).into(),
                search.title.into(),
                search.abstract_text.into(),
            ],
        );

        SearchEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::Internal {
                message: "Search insert returned no row".to_string(),
            })
    }

    async fn find_search_for_owner(&self, id: Uuid, user_id: Uuid) -> Result<Option<Search>> {
        // Primary: the Pearl chain reads a search back right after inserting it
        SearchEntity::find_by_id(id)
            .filter(SearchColumn::UserId.eq(user_id))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_searches(&self, user_id: Uuid, limit: u64) -> Result<Vec<Search>> {
        SearchEntity::find()
            .filter(SearchColumn::UserId.eq(user_id))
            .order_by_desc(SearchColumn::CreatedAt)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn match_papers(
        &self,
        search_id: Uuid,
        threshold: f64,
        count: u32,
    ) -> Result<Vec<PaperMatch>> {
        let started = Instant::now();

        // The stored embedding never leaves the database
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                m.id::int8 AS id,
                m.arxiv_id,
                m.title,
                m.abstract,
                m.authors,
                m.publish_date::text AS publish_date,
                m.doi,
                m.journal_ref,
                m.similarity::float8 AS similarity
            FROM match_papers(
                (SELECT embedding FROM reef_searches WHERE id = $1),
                $2::float8,
                $3::int4
            ) AS m
            ORDER BY m.similarity DESC
            "#,
            vec![search_id.into(), threshold.into(), (count as i32).into()],
        );

        // Primary, for the same read-after-write reason as `find_search_for_owner`
        let rows = self.write_conn().query_all(stmt).await?;
        let matches = rows
            .iter()
            .map(paper_match_from_row)
            .collect::<Result<Vec<_>>>()?;

        crate::metrics::record_vector_search(started.elapsed().as_secs_f64());
        Ok(matches)
    }

    // ========================================================================
    // Corpus Operations
    // ========================================================================

    async fn find_papers_by_arxiv_ids(&self, arxiv_ids: &[String]) -> Result<Vec<Paper>> {
        if arxiv_ids.is_empty() {
            return Ok(Vec::new());
        }

        PaperEntity::find()
            .filter(PaperColumn::ArxivId.is_in(arxiv_ids.iter().cloned()))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Purchase Operations
    // ========================================================================

    async fn grant_purchase(&self, purchase: &PurchaseRecord) -> Result<GrantOutcome> {
        let txn = self.write_conn().begin().await?;

        // Lock the buyer's row first; concurrent grants for the same session
        // serialize here and the loser hits the unique constraint below.
        let credited = txn
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                UPDATE profiles
                SET credits_remaining = credits_remaining + $2, updated_at = NOW()
                WHERE id = $1
                RETURNING credits_remaining
                "#,
                vec![purchase.user_id.into(), purchase.credits.into()],
            ))
            .await?;

        let Some(row) = credited else {
            txn.rollback().await?;
            return Ok(GrantOutcome::ProfileMissing);
        };
        let balance = row.try_get::<i32>("", "credits_remaining")?;

        let inserted = txn
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO credit_purchases (
                    id, user_id, stripe_session_id, credits_added, amount_paid, created_at
                )
                VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (stripe_session_id) DO NOTHING
                RETURNING id
                "#,
                vec![
                    Uuid::now_v7().into(),
                    purchase.user_id.into(),
                    purchase.stripe_session_id.clone().into(),
                    purchase.credits.into(),
                    purchase.amount_paid.into(),
                ],
            ))
            .await?;

        if inserted.is_none() {
            txn.rollback().await?;
            return Ok(GrantOutcome::AlreadyProcessed);
        }

        txn.commit().await?;
        Ok(GrantOutcome::Granted { balance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{MockDatabase, Value};
    use std::collections::BTreeMap;

    /// Primary answers from `primary`; the replica has nothing queued, so any
    /// query routed to it fails.
    fn pool_with_lagging_replica(primary: MockDatabase) -> DbPool {
        DbPool {
            primary: primary.into_connection(),
            replica: Some(MockDatabase::new(DbBackend::Postgres).into_connection()),
        }
    }

    #[tokio::test]
    async fn test_fresh_search_is_read_from_primary() {
        let (id, owner) = (Uuid::new_v4(), Uuid::new_v4());
        let row = Search {
            id,
            user_id: owner,
            title: Some("Sparse Graph Learning".to_string()),
            abstract_text: "protein folding".to_string(),
            created_at: Utc::now().into(),
        };
        let repo = Repository::new(pool_with_lagging_replica(
            MockDatabase::new(DbBackend::Postgres).append_query_results([vec![row]]),
        ));

        let found = repo.find_search_for_owner(id, owner).await.unwrap();
        assert_eq!(found.map(|s| s.id), Some(id));
    }

    #[tokio::test]
    async fn test_match_papers_reads_from_primary() {
        let row = BTreeMap::from([
            ("id", Value::from(7i64)),
            ("arxiv_id", Value::from(Some("2403.00007".to_string()))),
            ("title", Value::from(Some("Paper 7".to_string()))),
            ("abstract", Value::from(Some("An abstract.".to_string()))),
            ("authors", Value::from(None::<String>)),
            ("publish_date", Value::from(Some("2024-03-01".to_string()))),
            ("doi", Value::from(None::<String>)),
            ("journal_ref", Value::from(None::<String>)),
            ("similarity", Value::from(0.9f64)),
        ]);
        let repo = Repository::new(pool_with_lagging_replica(
            MockDatabase::new(DbBackend::Postgres).append_query_results([vec![row]]),
        ));

        let matches = repo.match_papers(Uuid::new_v4(), 0.0, 10).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].arxiv_id.as_deref(), Some("2403.00007"));
    }
}
