//! Payment provider seam
//!
//! `StripeClient` speaks the Stripe REST API directly (form-encoded bodies,
//! bearer auth). `MockPaymentProvider` keeps sessions in memory.

use crate::billing::packages::PackageType;
use crate::config::PaymentsConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Parameters for a new hosted checkout
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub package: PackageType,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    /// Build redirect URLs from the caller's origin
    pub fn new(user_id: Uuid, package: PackageType, origin: &str) -> Self {
        let origin = origin.trim_end_matches('/');
        Self {
            user_id,
            package,
            success_url: format!(
                "{}/profile?success=true&session_id={{CHECKOUT_SESSION_ID}}",
                origin
            ),
            cancel_url: format!("{}/profile?canceled=true", origin),
        }
    }
}

/// The subset of a Stripe Checkout Session the service relies on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    pub payment_status: String,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }

    /// Buyer from `metadata.userId`
    pub fn metadata_user_id(&self) -> Option<Uuid> {
        self.metadata
            .get("userId")
            .and_then(|v| Uuid::parse_str(v).ok())
    }

    /// Positive credit amount from `metadata.credits`
    pub fn metadata_credits(&self) -> Option<i32> {
        self.metadata
            .get("credits")
            .and_then(|v| v.trim().parse::<i32>().ok())
            .filter(|credits| *credits > 0)
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession>;
}

/// Session ids are interpolated into a URL path
fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 255
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::validation("sessionId", "Invalid session ID"))
    }
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Stripe REST client
pub struct StripeClient {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(config: &PaymentsConfig) -> Result<Self> {
        let secret_key = config
            .secret_key
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "payments.secret_key (or STRIPE_SECRET_KEY) is required".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            secret_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn parse(response: reqwest::Response) -> Result<CheckoutSession> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(body);
            return Err(AppError::PaymentProvider {
                message: format!("Stripe error {}: {}", status, detail),
            });
        }

        response.json().await.map_err(|e| AppError::PaymentProvider {
            message: format!("Failed to parse Stripe session: {}", e),
        })
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let credits = request.package.credits();
        let user_id = request.user_id.to_string();
        let params: Vec<(&str, String)> = vec![
            ("mode", "payment".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", "usd".to_string()),
            (
                "line_items[0][price_data][unit_amount]",
                request.package.price_cents().to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                format!("{} Research Credits", credits),
            ),
            (
                "line_items[0][price_data][product_data][description]",
                format!("Purchase {} credits for your research assistant", credits),
            ),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("client_reference_id", user_id.clone()),
            ("metadata[userId]", user_id),
            ("metadata[credits]", credits.to_string()),
            ("metadata[packageType]", request.package.as_str().to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider {
                message: format!("Stripe request failed: {}", e),
            })?;

        Self::parse(response).await
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession> {
        validate_session_id(session_id)?;

        let response = self
            .client
            .get(format!("{}/checkout/sessions/{}", self.api_base, session_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider {
                message: format!("Stripe request failed: {}", e),
            })?;

        Self::parse(response).await
    }
}

/// In-memory payment provider
#[derive(Default)]
pub struct MockPaymentProvider {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CheckoutSession>>> {
        self.sessions.lock().map_err(|_| AppError::Internal {
            message: "mock payment provider lock poisoned".to_string(),
        })
    }

    /// Store a session as-is
    pub fn insert_session(&self, session: CheckoutSession) {
        if let Ok(mut sessions) = self.sessions() {
            sessions.insert(session.id.clone(), session);
        }
    }

    /// Simulate the buyer completing payment
    pub fn mark_paid(&self, session_id: &str) -> bool {
        match self.sessions() {
            Ok(mut sessions) => match sessions.get_mut(session_id) {
                Some(session) => {
                    session.payment_status = "paid".to_string();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let id = format!("cs_test_{}", Uuid::new_v4().simple());
        let metadata = HashMap::from([
            ("userId".to_string(), request.user_id.to_string()),
            ("credits".to_string(), request.package.credits().to_string()),
            ("packageType".to_string(), request.package.as_str().to_string()),
        ]);
        let session = CheckoutSession {
            url: Some(format!("https://checkout.stripe.test/c/pay/{}", id)),
            id,
            payment_status: "unpaid".to_string(),
            amount_total: Some(request.package.price_cents()),
            client_reference_id: Some(request.user_id.to_string()),
            metadata,
        };
        self.insert_session(session.clone());
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession> {
        validate_session_id(session_id)?;
        self.sessions()?
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::PaymentProvider {
                message: format!("No such checkout.session: {}", session_id),
            })
    }
}

/// Create a payment provider based on configuration
pub fn create_payment_provider(config: &PaymentsConfig) -> Result<Arc<dyn PaymentProvider>> {
    match config.provider.as_str() {
        "stripe" => Ok(Arc::new(StripeClient::new(config)?)),
        "mock" => Ok(Arc::new(MockPaymentProvider::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown payment provider: {}", other),
        }),
    }
}
