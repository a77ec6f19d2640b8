//! Credit ledger
//!
//! A paid operation takes a `Reservation` before calling out, then either
//! commits it (the charge stands) or releases it (the credits come back).
//! The debit is one conditional decrement, so a balance can never go
//! negative and two concurrent requests can never both spend the last credit.
//!
//! A reservation dropped before it is settled (the request timed out or the
//! client went away mid-call) is refunded on a background task.

use crate::db::{DebitOutcome, Store};
use crate::errors::{AppError, Result};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Debit `cost` credits up front for `operation`
    pub async fn reserve(
        &self,
        user_id: Uuid,
        cost: i32,
        operation: &'static str,
    ) -> Result<Reservation> {
        if cost < 0 {
            return Err(AppError::Internal {
                message: format!("negative cost {} for {}", cost, operation),
            });
        }

        if cost > 0 {
            match self.store.try_debit(user_id, cost).await? {
                DebitOutcome::Debited { balance } => {
                    tracing::debug!(%user_id, cost, balance, operation, "Credits reserved");
                    crate::metrics::record_credits_reserved(operation, cost);
                }
                DebitOutcome::Insufficient { available } => {
                    crate::metrics::record_credit_rejection(operation);
                    return Err(AppError::InsufficientCredits {
                        required: cost,
                        available,
                    });
                }
                DebitOutcome::ProfileMissing => {
                    return Err(AppError::ProfileNotFound {
                        id: user_id.to_string(),
                    });
                }
            }
        }

        Ok(Reservation {
            store: self.store.clone(),
            user_id,
            amount: cost,
            operation,
            settled: false,
        })
    }
}

/// Credits held for one paid operation
///
/// Dropping an unsettled reservation refunds it.
#[must_use = "a reservation must be committed or released"]
pub struct Reservation {
    store: Arc<dyn Store>,
    user_id: Uuid,
    amount: i32,
    operation: &'static str,
    settled: bool,
}

impl Reservation {
    /// Keep the charge
    pub fn commit(mut self) {
        self.settled = true;
        tracing::debug!(
            user_id = %self.user_id,
            amount = self.amount,
            operation = self.operation,
            "Reservation committed"
        );
    }

    /// Refund the charge
    pub async fn release(mut self) -> Result<()> {
        self.settled = true;
        refund(self.store.as_ref(), self.user_id, self.amount, self.operation).await
    }

    /// Commit on `Ok`, release on `Err`, and hand the result back
    pub async fn settle<T>(self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit();
                Ok(value)
            }
            Err(err) => {
                let user_id = self.user_id;
                let operation = self.operation;
                if let Err(refund_err) = self.release().await {
                    tracing::error!(
                        %user_id,
                        operation,
                        error = %refund_err,
                        "Failed to refund reservation"
                    );
                }
                Err(err)
            }
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled || self.amount == 0 {
            return;
        }

        let store = self.store.clone();
        let (user_id, amount, operation) = (self.user_id, self.amount, self.operation);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    %user_id,
                    amount,
                    operation,
                    "Reservation dropped unsettled; refunding"
                );
                handle.spawn(async move {
                    if let Err(e) = refund(store.as_ref(), user_id, amount, operation).await {
                        tracing::error!(
                            %user_id,
                            operation,
                            error = %e,
                            "Failed to refund dropped reservation"
                        );
                    }
                });
            }
            Err(_) => tracing::error!(
                %user_id,
                amount,
                operation,
                "Reservation dropped outside a runtime; charge stands"
            ),
        }
    }
}

async fn refund(
    store: &dyn Store,
    user_id: Uuid,
    amount: i32,
    operation: &'static str,
) -> Result<()> {
    if amount == 0 {
        return Ok(());
    }

    match store.credit(user_id, amount).await? {
        Some(balance) => {
            tracing::info!(%user_id, amount, balance, operation, "Reservation released");
            crate::metrics::record_credits_released(operation, amount);
        }
        None => tracing::warn!(%user_id, operation, "Profile vanished before refund"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn ledger_with(user: Uuid, credits: i32) -> (CreditLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new().with_profile(user, credits, true));
        (CreditLedger::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_commit_keeps_charge() {
        let user = Uuid::new_v4();
        let (ledger, store) = ledger_with(user, 5);

        let reservation = ledger.reserve(user, 1, "search").await.unwrap();
        assert_eq!(store.balance(user), Some(4));
        reservation.commit();
        assert_eq!(store.balance(user), Some(4));
    }

    #[tokio::test]
    async fn test_release_refunds() {
        let user = Uuid::new_v4();
        let (ledger, store) = ledger_with(user, 5);

        let reservation = ledger.reserve(user, 2, "search").await.unwrap();
        assert_eq!(store.balance(user), Some(3));
        reservation.release().await.unwrap();
        assert_eq!(store.balance(user), Some(5));
    }

    #[tokio::test]
    async fn test_settle_error_refunds() {
        let user = Uuid::new_v4();
        let (ledger, store) = ledger_with(user, 1);

        let reservation = ledger.reserve(user, 1, "search").await.unwrap();
        let result: Result<()> = reservation
            .settle(Err(AppError::EmbeddingError {
                message: "down".into(),
            }))
            .await;
        assert!(result.is_err());
        assert_eq!(store.balance(user), Some(1));
    }

    #[tokio::test]
    async fn test_insufficient_and_missing() {
        let user = Uuid::new_v4();
        let (ledger, _) = ledger_with(user, 0);

        assert!(matches!(
            ledger.reserve(user, 1, "search").await,
            Err(AppError::InsufficientCredits {
                required: 1,
                available: 0
            })
        ));
        assert!(matches!(
            ledger.reserve(Uuid::new_v4(), 1, "search").await,
            Err(AppError::ProfileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_overdraw() {
        let user = Uuid::new_v4();
        let (ledger, store) = ledger_with(user, 3);

        let attempts = (0..10).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.reserve(user, 1, "search").await.map(|r| r.commit()) })
        });
        let mut granted = 0;
        for handle in attempts {
            if handle.await.unwrap().is_ok() {
                granted += 1;
            }
        }

        assert_eq!(granted, 3);
        assert_eq!(store.balance(user), Some(0));
    }

    async fn wait_for_balance(store: &MemoryStore, user: Uuid, expected: i32) -> Option<i32> {
        for _ in 0..100 {
            if store.balance(user) == Some(expected) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        store.balance(user)
    }

    #[tokio::test]
    async fn test_dropped_reservation_is_refunded() {
        let user = Uuid::new_v4();
        let (ledger, store) = ledger_with(user, 2);

        drop(ledger.reserve(user, 1, "search").await.unwrap());
        assert_eq!(wait_for_balance(&store, user, 2).await, Some(2));
    }

    #[tokio::test]
    async fn test_cancelled_operation_is_refunded() {
        let user = Uuid::new_v4();
        let (ledger, store) = ledger_with(user, 5);

        let paid_call = async {
            let reservation = ledger.reserve(user, 1, "search").await?;
            let result: Result<()> = async {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok(())
            }
            .await;
            reservation.settle(result).await
        };
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), paid_call).await;

        assert!(timed_out.is_err());
        assert_eq!(wait_for_balance(&store, user, 5).await, Some(5));
    }
}
