//! Pearl orchestration
//!
//! Runs the stages in order and bills each one through its own reservation.

use super::angles::generate_angles;
use super::extract::{analyze_papers, normalize_ids};
use super::types::{AnglesReport, ExtractionReport, PaperAnalysis, SynthesisReport};
use crate::billing::CreditLedger;
use crate::db::Store;
use crate::errors::{AppError, Result, Stage};
use crate::llm::LanguageModel;
use crate::reef::{validate_abstract, ReefService};
use std::sync::Arc;
use uuid::Uuid;

/// Papers carried from the search stage into extraction
pub const TOP_PAPERS: usize = 5;

pub struct PearlService {
    store: Arc<dyn Store>,
    ledger: CreditLedger,
    llm: Arc<dyn LanguageModel>,
    reef: Arc<ReefService>,
    extraction_cost: i32,
    generation_cost: i32,
}

impl PearlService {
    pub fn new(
        store: Arc<dyn Store>,
        llm: Arc<dyn LanguageModel>,
        reef: Arc<ReefService>,
        extraction_cost: i32,
        generation_cost: i32,
    ) -> Self {
        Self {
            ledger: CreditLedger::new(store.clone()),
            store,
            llm,
            reef,
            extraction_cost,
            generation_cost,
        }
    }

    /// Extraction stage on caller-supplied arXiv ids
    #[tracing::instrument(skip(self, arxiv_ids), fields(papers = arxiv_ids.len()))]
    pub async fn extract_claims(
        &self,
        user_id: Uuid,
        arxiv_ids: &[String],
    ) -> Result<ExtractionReport> {
        let ids = normalize_ids(arxiv_ids)?;
        self.run_extraction(user_id, &ids).await
    }

    async fn run_extraction(&self, user_id: Uuid, ids: &[String]) -> Result<ExtractionReport> {
        let reservation = self
            .ledger
            .reserve(user_id, self.extraction_cost, "extraction")
            .await?;
        let result = analyze_papers(self.store.as_ref(), self.llm.as_ref(), ids).await;
        reservation.settle(result).await
    }

    /// Generation stage on caller-supplied analyses
    #[tracing::instrument(skip(self, idea, papers), fields(papers = papers.len()))]
    pub async fn generate(
        &self,
        user_id: Uuid,
        idea: &str,
        papers: Vec<PaperAnalysis>,
    ) -> Result<AnglesReport> {
        let idea = validate_abstract("researchIdea", idea)?;
        if papers.is_empty() {
            return Err(AppError::validation(
                "papers",
                "At least one analyzed paper is required",
            ));
        }
        self.run_generation(user_id, idea, papers).await
    }

    async fn run_generation(
        &self,
        user_id: Uuid,
        idea: String,
        papers: Vec<PaperAnalysis>,
    ) -> Result<AnglesReport> {
        let reservation = self
            .ledger
            .reserve(user_id, self.generation_cost, "generation")
            .await?;
        let result = generate_angles(self.llm.as_ref(), &idea, &papers).await;
        let angles = reservation.settle(result).await?;

        Ok(AnglesReport {
            angles,
            analyzed_papers: papers.len(),
            user_idea: idea,
        })
    }

    /// Search, extraction and generation in sequence
    ///
    /// Each stage holds its own reservation. A failing stage refunds itself
    /// and is reported with its name; earlier stages stay charged.
    #[tracing::instrument(skip(self, idea))]
    pub async fn synthesize(&self, user_id: Uuid, idea: &str) -> Result<SynthesisReport> {
        let idea = validate_abstract("researchIdea", idea)?;
        self.reef.ensure_whitelisted(user_id).await?;

        let ids = self
            .search_stage(user_id, &idea)
            .await
            .map_err(|e| e.at_stage(Stage::Search))?;

        let extraction = self
            .run_extraction(user_id, &ids)
            .await
            .map_err(|e| e.at_stage(Stage::Extraction))?;

        let ExtractionReport { papers, errors } = extraction;
        let report = self
            .run_generation(user_id, idea, papers)
            .await
            .map_err(|e| e.at_stage(Stage::Generation))?;

        tracing::info!(
            %user_id,
            angles = report.angles.len(),
            analyzed = report.analyzed_papers,
            failed = errors.len(),
            "Synthesis complete"
        );

        Ok(SynthesisReport {
            angles: report.angles,
            analyzed_papers: report.analyzed_papers,
            user_idea: report.user_idea,
            errors,
        })
    }

    async fn search_stage(&self, user_id: Uuid, idea: &str) -> Result<Vec<String>> {
        let created = self.reef.create_search(user_id, idea).await?;
        let results = self.reef.search_results(user_id, created.search_id).await?;

        let ids: Vec<String> = results
            .papers
            .into_iter()
            .filter_map(|paper| paper.arxiv_id)
            .take(TOP_PAPERS)
            .collect();

        if ids.is_empty() {
            return Err(AppError::validation(
                "researchIdea",
                "No relevant papers found. Try a different idea.",
            ));
        }
        Ok(ids)
    }
}
