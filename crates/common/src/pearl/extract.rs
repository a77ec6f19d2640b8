//! Claim extraction: one JSON chat call per paper

use super::types::{ExtractionError, ExtractionReport, PaperAnalysis};
use crate::db::models::Paper;
use crate::db::Store;
use crate::errors::{AppError, Result};
use crate::llm::{parse_json_reply, ChatRequest, LanguageModel, Purpose};
use serde::Deserialize;
use std::collections::HashSet;

/// Most papers accepted by one extraction call
pub const MAX_PAPERS: usize = 10;

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a research analyst. Read the paper and \
reply with a JSON object with the keys \"claims\" (array of strings), \"methods\" \
(array of strings), \"limitations\" (array of strings) and \"conclusion\" (string). \
Be specific and concise.";

#[derive(Deserialize)]
struct ExtractionReply {
    #[serde(default)]
    claims: Vec<String>,
    #[serde(default)]
    methods: Vec<String>,
    #[serde(default)]
    limitations: Vec<String>,
    #[serde(default)]
    conclusion: String,
}

/// Trim, drop blanks and duplicates, keep first-seen order
pub fn normalize_ids(ids: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        return Err(AppError::validation(
            "arxiv_ids",
            "arxiv_ids must contain at least one paper id",
        ));
    }
    if ids.len() > MAX_PAPERS {
        return Err(AppError::validation(
            "arxiv_ids",
            format!("At most {} papers can be analyzed at once", MAX_PAPERS),
        ));
    }
    Ok(ids)
}

async fn analyze_one(llm: &dyn LanguageModel, paper: &Paper) -> Result<PaperAnalysis> {
    let user = format!(
        "Title: {}\n\nAbstract: {}",
        paper.title.as_deref().unwrap_or("(untitled)"),
        paper.abstract_text.as_deref().unwrap_or("(no abstract)")
    );
    let raw = llm
        .complete(&ChatRequest {
            purpose: Purpose::ClaimExtraction,
            system: EXTRACTION_SYSTEM_PROMPT.to_string(),
            user,
            max_tokens: 800,
            temperature: 0.3,
            json: true,
        })
        .await?;
    let reply: ExtractionReply = parse_json_reply(&raw)?;

    Ok(PaperAnalysis {
        arxiv_id: paper.arxiv_id.clone(),
        title: paper.title.clone(),
        claims: reply.claims,
        methods: reply.methods,
        limitations: reply.limitations,
        conclusion: reply.conclusion,
    })
}

/// Analyze each paper in order; fails only when none succeed
pub(crate) async fn analyze_papers(
    store: &dyn Store,
    llm: &dyn LanguageModel,
    ids: &[String],
) -> Result<ExtractionReport> {
    let corpus = store.find_papers_by_arxiv_ids(ids).await?;

    let mut papers = Vec::with_capacity(ids.len());
    let mut errors = Vec::new();
    let mut model_failures = 0usize;

    for id in ids {
        let Some(paper) = corpus.iter().find(|p| p.arxiv_id.as_deref() == Some(id.as_str())) else {
            errors.push(ExtractionError {
                arxiv_id: id.clone(),
                error: "Paper not found".to_string(),
            });
            continue;
        };

        match analyze_one(llm, paper).await {
            Ok(analysis) => papers.push(analysis),
            Err(err) => {
                tracing::warn!(arxiv_id = %id, error = %err, "Claim extraction failed");
                model_failures += 1;
                errors.push(ExtractionError {
                    arxiv_id: id.clone(),
                    error: err.public_message(),
                });
            }
        }
    }

    if papers.is_empty() {
        return Err(if model_failures > 0 {
            AppError::LlmError {
                message: format!("claim extraction failed for all {} papers", ids.len()),
            }
        } else {
            AppError::NotFound {
                resource_type: "paper".to_string(),
                id: ids.join(","),
            }
        });
    }

    tracing::info!(analyzed = papers.len(), failed = errors.len(), "Claims extracted");
    Ok(ExtractionReport { papers, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::llm::{canned_reply, MockLanguageModel};

    fn paper(id: i64, arxiv: &str) -> Paper {
        Paper {
            id,
            arxiv_id: Some(arxiv.to_string()),
            title: Some(format!("Paper {}", arxiv)),
            abstract_text: Some("We study things.".to_string()),
            authors: None,
            publish_date: None,
            doi: None,
            journal_ref: None,
        }
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_ids() {
        assert_eq!(
            normalize_ids(&ids(&[" 1 ", "2", "1", ""])).unwrap(),
            ids(&["1", "2"])
        );
        assert!(normalize_ids(&ids(&["", "  "])).is_err());
        let many: Vec<String> = (0..=MAX_PAPERS).map(|i| i.to_string()).collect();
        assert!(normalize_ids(&many).is_err());
    }

    #[tokio::test]
    async fn test_missing_paper_is_a_per_paper_error() {
        let store = MemoryStore::new();
        store.add_paper(paper(1, "2401.00001"), vec![1.0, 0.0]);
        let llm = MockLanguageModel::canned();

        let report = analyze_papers(&store, &llm, &ids(&["2401.00001", "9999.99999"]))
            .await
            .unwrap();

        assert_eq!(report.papers.len(), 1);
        assert_eq!(report.papers[0].arxiv_id.as_deref(), Some("2401.00001"));
        assert_eq!(report.papers[0].methods.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].arxiv_id, "9999.99999");
    }

    #[tokio::test]
    async fn test_partial_model_failure_keeps_successes() {
        let store = MemoryStore::new();
        store.add_paper(paper(1, "a"), vec![1.0, 0.0]);
        store.add_paper(paper(2, "b"), vec![0.0, 1.0]);
        let llm = MockLanguageModel::new(|req| {
            if req.user.contains("Paper b") {
                Ok("not json".to_string())
            } else {
                Ok(canned_reply(req.purpose))
            }
        });

        let report = analyze_papers(&store, &llm, &ids(&["a", "b"])).await.unwrap();
        assert_eq!(report.papers.len(), 1);
        assert_eq!(report.errors[0].arxiv_id, "b");
    }

    #[tokio::test]
    async fn test_all_failures_fail_the_stage() {
        let store = MemoryStore::new();
        store.add_paper(paper(1, "a"), vec![1.0, 0.0]);
        let llm = MockLanguageModel::new(|_| {
            Err(AppError::LlmError {
                message: "down".into(),
            })
        });

        let err = analyze_papers(&store, &llm, &ids(&["a"])).await.unwrap_err();
        assert!(matches!(err, AppError::LlmError { .. }));

        let err = analyze_papers(&store, &llm, &ids(&["zzz"])).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}
