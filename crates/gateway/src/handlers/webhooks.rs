//! Payment provider webhook

use crate::AppState;
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use reef_common::{
    billing::WebhookAck,
    errors::{AppError, Result},
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Verify, parse and reconcile a provider event; the raw body is what was signed
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::InvalidSignature {
            message: "missing Stripe-Signature header".to_string(),
        })?;

    let event = state.webhooks.construct_event(&body, signature)?;
    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Webhook received");

    let ack = state.reconciler.handle_event(&event).await?;
    Ok(Json(ack))
}
