//! API handlers module

pub mod checkout;
pub mod documents;
pub mod health;
pub mod papers;
pub mod pearl;
pub mod profile;
pub mod search;
pub mod webhooks;
