//! Credit checkout handlers

use crate::extract::ApiJson;
use crate::middleware::rate_limit::EndpointClass;
use crate::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use reef_common::{
    auth::AuthUser,
    billing::{CheckoutRequest, PackageType, ReconcileOutcome},
    errors::Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub package_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyBody {
    #[serde(default)]
    pub session_id: String,
}

/// Start a hosted checkout for a credit package
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthUser,
    ApiJson(body): ApiJson<CheckoutBody>,
) -> Result<Json<CheckoutResponse>> {
    state
        .rate_limit(EndpointClass::Checkout, &auth, &headers)
        .await?;

    let package: PackageType = body.package_type.parse()?;
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&state.config.payments.public_base_url);

    let request = CheckoutRequest::new(auth.user_id, package, origin);
    let session = state.payments.create_checkout_session(&request).await?;

    tracing::info!(
        user_id = %auth.user_id,
        session_id = %session.id,
        package = package.as_str(),
        "Checkout session created"
    );

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// Grant credits for a completed checkout the client returned from
pub async fn verify_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthUser,
    ApiJson(body): ApiJson<VerifyBody>,
) -> Result<Json<ReconcileOutcome>> {
    state
        .rate_limit(EndpointClass::Checkout, &auth, &headers)
        .await?;

    let outcome = state.reconciler.verify_session(&body.session_id).await?;
    Ok(Json(outcome))
}
