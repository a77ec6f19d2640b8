//! Pearl synthesis handlers

use crate::extract::ApiJson;
use crate::middleware::rate_limit::EndpointClass;
use crate::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use reef_common::{
    auth::AuthUser,
    errors::Result,
    pearl::{AnglesReport, ExtractionReport, PaperAnalysis, SynthesisReport},
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractClaimsBody {
    pub user_id: Uuid,
    #[serde(rename = "arxiv_ids", default)]
    pub arxiv_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenAnglesBody {
    pub user_id: Uuid,
    #[serde(default)]
    pub research_idea: String,
    #[serde(default)]
    pub papers: Vec<PaperAnalysis>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeBody {
    pub user_id: Uuid,
    #[serde(default)]
    pub research_idea: String,
}

pub async fn extract_claims(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthUser,
    ApiJson(body): ApiJson<ExtractClaimsBody>,
) -> Result<Json<ExtractionReport>> {
    auth.ensure_matches(body.user_id)?;
    state.rate_limit(EndpointClass::Pearl, &auth, &headers).await?;

    let report = state
        .pearl
        .extract_claims(auth.user_id, &body.arxiv_ids)
        .await?;
    Ok(Json(report))
}

pub async fn gen_angles(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthUser,
    ApiJson(body): ApiJson<GenAnglesBody>,
) -> Result<Json<AnglesReport>> {
    auth.ensure_matches(body.user_id)?;
    state.rate_limit(EndpointClass::Pearl, &auth, &headers).await?;

    let report = state
        .pearl
        .generate(auth.user_id, &body.research_idea, body.papers)
        .await?;
    Ok(Json(report))
}

/// Full chain: search, extraction, generation
pub async fn synthesize(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthUser,
    ApiJson(body): ApiJson<SynthesizeBody>,
) -> Result<Json<SynthesisReport>> {
    auth.ensure_matches(body.user_id)?;
    state.rate_limit(EndpointClass::Pearl, &auth, &headers).await?;

    let report = state
        .pearl
        .synthesize(auth.user_id, &body.research_idea)
        .await?;
    Ok(Json(report))
}
