//! Webhook signature verification
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=...]`. The signed
//! payload is `"{t}.{raw body}"`, keyed with the endpoint's signing secret.

use crate::billing::stripe::CheckoutSession;
use crate::errors::{AppError, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Interpret `data.object` as a checkout session
    pub fn checkout_session(&self) -> Result<CheckoutSession> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| AppError::validation("data.object", format!("Malformed session: {}", e)))
    }
}

pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

fn invalid(message: &str) -> AppError {
    AppError::InvalidSignature {
        message: message.to_string(),
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: tolerance_secs as i64,
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|e| {
            AppError::Configuration {
                message: format!("Invalid webhook secret: {}", e),
            }
        })?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Produce a header value for `payload`; used by tests and local tooling
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let signature = hex::encode(self.mac(timestamp, payload)?.finalize().into_bytes());
        Ok(format!("t={},v1={}", timestamp, signature))
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<()> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    /// Verify against an explicit clock
    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<()> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| invalid("missing timestamp"))?;
        if signatures.is_empty() {
            return Err(invalid("no v1 signature"));
        }

        let mac = self.mac(timestamp, payload)?;
        let matched = signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });
        if !matched {
            return Err(invalid("signature mismatch"));
        }

        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(invalid("timestamp outside the tolerance zone"));
        }

        Ok(())
    }

    /// Verify the signature, then parse the event
    pub fn construct_event(&self, payload: &[u8], header: &str) -> Result<WebhookEvent> {
        self.verify(payload, header)?;
        serde_json::from_slice(payload)
            .map_err(|e| AppError::validation("body", format!("Malformed event: {}", e)))
    }
}
