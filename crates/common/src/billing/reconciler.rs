//! Payment reconciler
//!
//! Two triggers lead here: the client returning from checkout
//! (`verify_session`) and the provider's webhook (`handle_event`). Both end
//! in `reconcile`, whose only durable effect is `Store::grant_purchase`,
//! keyed on the session id. The LRU in front of it only saves a provider
//! round trip for sessions this process has already seen.

use crate::billing::stripe::{CheckoutSession, PaymentProvider};
use crate::billing::webhook::{WebhookEvent, CHECKOUT_SESSION_COMPLETED};
use crate::db::{GrantOutcome, PurchaseRecord, Store};
use crate::errors::{AppError, Result};
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of a verification or a webhook-driven grant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_processed: bool,
    /// Balance after the grant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<i32>,
    /// Credits granted by this call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReconcileOutcome {
    fn granted(balance: i32, added: i32) -> Self {
        Self {
            success: true,
            already_processed: false,
            credits: Some(balance),
            added: Some(added),
            message: None,
        }
    }

    fn already_processed() -> Self {
        Self {
            success: true,
            already_processed: true,
            credits: None,
            added: None,
            message: Some("Credits already added".to_string()),
        }
    }
}

/// Webhook response body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_processed: bool,
}

impl WebhookAck {
    fn received() -> Self {
        Self {
            received: true,
            already_processed: false,
        }
    }
}

pub struct PaymentReconciler {
    store: Arc<dyn Store>,
    payments: Arc<dyn PaymentProvider>,
    processed: Mutex<LruCache<String, ()>>,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        payments: Arc<dyn PaymentProvider>,
        cache_size: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            payments,
            processed: Mutex::new(LruCache::new(capacity)),
        }
    }

    async fn seen(&self, session_id: &str) -> bool {
        self.processed.lock().await.get(session_id).is_some()
    }

    async fn remember(&self, session_id: &str) {
        self.processed.lock().await.put(session_id.to_string(), ());
    }

    /// Client-triggered verification after returning from checkout
    pub async fn verify_session(&self, session_id: &str) -> Result<ReconcileOutcome> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(AppError::validation("sessionId", "Missing session ID"));
        }

        if self.seen(session_id).await {
            crate::metrics::record_purchase(false, "verify");
            return Ok(ReconcileOutcome::already_processed());
        }

        let session = self.payments.retrieve_session(session_id).await?;
        if !session.is_paid() {
            return Err(AppError::PaymentIncomplete);
        }

        self.reconcile(&session, "verify").await
    }

    /// Provider-triggered notification; the signature is already verified
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<WebhookAck> {
        if event.event_type != CHECKOUT_SESSION_COMPLETED {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
            return Ok(WebhookAck::received());
        }

        let session = event.checkout_session()?;
        if !session.is_paid() {
            tracing::info!(session_id = %session.id, status = %session.payment_status, "Checkout completed without payment");
            return Ok(WebhookAck::received());
        }

        if self.seen(&session.id).await {
            crate::metrics::record_purchase(false, "webhook");
            return Ok(WebhookAck {
                received: true,
                already_processed: true,
            });
        }

        let outcome = self.reconcile(&session, "webhook").await?;
        Ok(WebhookAck {
            received: true,
            already_processed: outcome.already_processed,
        })
    }

    /// Grant the session's credits at most once
    pub async fn reconcile(&self, session: &CheckoutSession, trigger: &str) -> Result<ReconcileOutcome> {
        let (Some(user_id), Some(credits)) = (session.metadata_user_id(), session.metadata_credits())
        else {
            tracing::warn!(session_id = %session.id, trigger, "Session metadata incomplete");
            return Err(AppError::validation("metadata", "Missing metadata"));
        };

        let record = PurchaseRecord {
            user_id,
            stripe_session_id: session.id.clone(),
            credits,
            amount_paid: session.amount_total.and_then(|a| i32::try_from(a).ok()),
        };

        match self.store.grant_purchase(&record).await? {
            GrantOutcome::Granted { balance } => {
                self.remember(&session.id).await;
                crate::metrics::record_purchase(true, trigger);
                tracing::info!(
                    session_id = %session.id,
                    %user_id,
                    credits,
                    balance,
                    trigger,
                    "Credits granted"
                );
                Ok(ReconcileOutcome::granted(balance, credits))
            }
            GrantOutcome::AlreadyProcessed => {
                self.remember(&session.id).await;
                crate::metrics::record_purchase(false, trigger);
                tracing::info!(session_id = %session.id, trigger, "Session already processed");
                Ok(ReconcileOutcome::already_processed())
            }
            GrantOutcome::ProfileMissing => Err(AppError::ProfileNotFound {
                id: user_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::packages::PackageType;
    use crate::billing::stripe::{CheckoutRequest, MockPaymentProvider};
    use crate::db::MemoryStore;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        payments: Arc<MockPaymentProvider>,
        reconciler: PaymentReconciler,
        user: Uuid,
    }

    fn fixture(cache_size: usize) -> Fixture {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new().with_profile(user, 0, true));
        let payments = Arc::new(MockPaymentProvider::new());
        let reconciler = PaymentReconciler::new(store.clone(), payments.clone(), cache_size);
        Fixture {
            store,
            payments,
            reconciler,
            user,
        }
    }

    async fn paid_session(f: &Fixture, package: PackageType) -> CheckoutSession {
        let request = CheckoutRequest::new(f.user, package, "http://localhost");
        let session = f.payments.create_checkout_session(&request).await.unwrap();
        f.payments.mark_paid(&session.id);
        f.payments.retrieve_session(&session.id).await.unwrap()
    }

    fn completed_event(session: &CheckoutSession) -> WebhookEvent {
        serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": session }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_verify_grants_once() {
        let f = fixture(16);
        let session = paid_session(&f, PackageType::Medium).await;

        let first = f.reconciler.verify_session(&session.id).await.unwrap();
        assert_eq!(first, ReconcileOutcome::granted(50, 50));

        let second = f.reconciler.verify_session(&session.id).await.unwrap();
        assert!(second.already_processed);
        assert_eq!(f.store.balance(f.user), Some(50));
    }

    #[tokio::test]
    async fn test_durable_gate_without_cache() {
        // A one-slot cache evicted by another session must still not double grant
        let f = fixture(1);
        let a = paid_session(&f, PackageType::Small).await;
        let b = paid_session(&f, PackageType::Small).await;

        f.reconciler.verify_session(&a.id).await.unwrap();
        f.reconciler.verify_session(&b.id).await.unwrap();
        let again = f.reconciler.verify_session(&a.id).await.unwrap();

        assert!(again.already_processed);
        assert_eq!(f.store.balance(f.user), Some(20));
        assert_eq!(f.store.purchase_count(), 2);
    }

    #[tokio::test]
    async fn test_unpaid_session_is_rejected() {
        let f = fixture(16);
        let request = CheckoutRequest::new(f.user, PackageType::Small, "http://localhost");
        let session = f.payments.create_checkout_session(&request).await.unwrap();

        assert!(matches!(
            f.reconciler.verify_session(&session.id).await,
            Err(AppError::PaymentIncomplete)
        ));
        assert_eq!(f.store.balance(f.user), Some(0));
    }

    #[tokio::test]
    async fn test_missing_metadata_changes_nothing() {
        let f = fixture(16);
        let mut session = paid_session(&f, PackageType::Small).await;
        session.metadata.remove("credits");

        assert!(matches!(
            f.reconciler.reconcile(&session, "webhook").await,
            Err(AppError::Validation { .. })
        ));
        assert_eq!(f.store.purchase_count(), 0);
    }

    #[tokio::test]
    async fn test_webhook_then_verify_grants_once() {
        let f = fixture(16);
        let session = paid_session(&f, PackageType::Large).await;

        let ack = f.reconciler.handle_event(&completed_event(&session)).await.unwrap();
        assert!(!ack.already_processed);

        let dup = f.reconciler.handle_event(&completed_event(&session)).await.unwrap();
        assert!(dup.already_processed);

        let verified = f.reconciler.verify_session(&session.id).await.unwrap();
        assert!(verified.already_processed);
        assert_eq!(f.store.balance(f.user), Some(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_grant_once() {
        let f = fixture(16);
        let session = paid_session(&f, PackageType::Medium).await;
        let reconciler = Arc::new(PaymentReconciler::new(
            f.store.clone(),
            f.payments.clone(),
            16,
        ));

        let deliveries: Vec<_> = (0..10)
            .map(|i| {
                let reconciler = reconciler.clone();
                let session = session.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        let ack = reconciler.handle_event(&completed_event(&session)).await?;
                        Ok::<bool, AppError>(!ack.already_processed)
                    } else {
                        let outcome = reconciler.verify_session(&session.id).await?;
                        Ok(!outcome.already_processed)
                    }
                })
            })
            .collect();

        let mut grants = 0;
        for delivery in deliveries {
            if delivery.await.unwrap().unwrap() {
                grants += 1;
            }
        }

        assert_eq!(grants, 1);
        assert_eq!(f.store.purchase_count(), 1);
        assert_eq!(f.store.balance(f.user), Some(50));
    }

    #[tokio::test]
    async fn test_other_events_are_acknowledged() {
        let f = fixture(16);
        let event: WebhookEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_2",
            "type": "payment_intent.created",
            "data": { "object": {} }
        }))
        .unwrap();

        let ack = f.reconciler.handle_event(&event).await.unwrap();
        assert_eq!(ack, WebhookAck::received());
    }
}
