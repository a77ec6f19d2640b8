//! Pearl request and response shapes

use serde::{Deserialize, Serialize};

/// Structured reading of one paper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperAnalysis {
    #[serde(default)]
    pub arxiv_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub claims: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<String>,
    #[serde(default)]
    pub conclusion: String,
}

/// A paper that could not be analyzed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionError {
    pub arxiv_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchAngle {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub novelty: f64,
    #[serde(default)]
    pub practicality: f64,
    #[serde(default)]
    pub impact: f64,
    /// Derived; whatever the model sends is overwritten
    #[serde(default)]
    pub overall_score: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub brief_plan: Vec<String>,
    #[serde(default)]
    pub related_limitations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub papers: Vec<PaperAnalysis>,
    pub errors: Vec<ExtractionError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnglesReport {
    pub angles: Vec<ResearchAngle>,
    pub analyzed_papers: usize,
    pub user_idea: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisReport {
    pub angles: Vec<ResearchAngle>,
    pub analyzed_papers: usize,
    pub user_idea: String,
    pub errors: Vec<ExtractionError>,
}
