//! Credits and payments
//!
//! - `ledger`: reserve / commit / release around paid operations
//! - `packages`: the purchasable credit bundles
//! - `stripe`: the payment provider seam and its Stripe client
//! - `webhook`: `Stripe-Signature` verification
//! - `reconciler`: turns paid checkout sessions into exactly one credit grant

pub mod ledger;
pub mod packages;
pub mod reconciler;
pub mod stripe;
pub mod webhook;

pub use ledger::{CreditLedger, Reservation};
pub use packages::PackageType;
pub use reconciler::{PaymentReconciler, ReconcileOutcome, WebhookAck};
pub use stripe::{
    create_payment_provider, CheckoutRequest, CheckoutSession, MockPaymentProvider,
    PaymentProvider, StripeClient,
};
pub use webhook::{WebhookEvent, WebhookVerifier};
