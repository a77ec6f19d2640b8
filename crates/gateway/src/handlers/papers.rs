//! Search creation handler

use crate::extract::ApiJson;
use crate::middleware::rate_limit::EndpointClass;
use crate::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use reef_common::{auth::AuthUser, errors::Result, reef::CreatedSearch};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSearchBody {
    pub user_id: Uuid,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
}

/// Embed an abstract and save it as a search (1 credit)
pub async fn create_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthUser,
    ApiJson(body): ApiJson<CreateSearchBody>,
) -> Result<Json<CreatedSearch>> {
    auth.ensure_matches(body.user_id)?;
    state
        .rate_limit(EndpointClass::SearchCreate, &auth, &headers)
        .await?;

    let created = state
        .reef
        .create_search(auth.user_id, &body.abstract_text)
        .await?;
    Ok(Json(created))
}
