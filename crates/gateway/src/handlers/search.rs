//! Search result and history handlers

use crate::extract::ApiJson;
use crate::middleware::rate_limit::EndpointClass;
use crate::AppState;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::HeaderMap,
    Json,
};
use reef_common::{
    auth::AuthUser,
    db::models::Search,
    errors::{AppError, Result},
    reef::SearchResults,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultsBody {
    pub user_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub searches: Vec<Search>,
}

/// A saved search and its most similar papers
pub async fn get_search_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    auth: AuthUser,
    ApiJson(body): ApiJson<SearchResultsBody>,
) -> Result<Json<SearchResults>> {
    auth.ensure_matches(body.user_id)?;
    state
        .rate_limit(EndpointClass::SearchRead, &auth, &headers)
        .await?;

    let search_id =
        Uuid::parse_str(&id).map_err(|_| AppError::validation("id", "Invalid search id"))?;

    let results = state.reef.search_results(auth.user_id, search_id).await?;
    Ok(Json(results))
}

/// The caller's saved searches, newest first
pub async fn list_searches(
    State(state): State<AppState>,
    auth: AuthUser,
    query: std::result::Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>> {
    let Query(query) = query.map_err(|e| AppError::validation("limit", e.body_text()))?;
    let searches = state.reef.list_searches(auth.user_id, query.limit).await?;
    Ok(Json(HistoryResponse { searches }))
}
