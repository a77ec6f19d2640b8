//! SeaORM entity models
//!
//! Database entities for Reef. Vector columns are not mapped; they are
//! written and queried through raw statements in the repository.

mod credit_purchase;
mod paper;
mod profile;
mod search;

pub use profile::{
    Entity as ProfileEntity,
    Model as Profile,
    ActiveModel as ProfileActiveModel,
    Column as ProfileColumn,
};

pub use search::{
    Entity as SearchEntity,
    Model as Search,
    ActiveModel as SearchActiveModel,
    Column as SearchColumn,
};

pub use credit_purchase::{
    Entity as CreditPurchaseEntity,
    Model as CreditPurchase,
    ActiveModel as CreditPurchaseActiveModel,
    Column as CreditPurchaseColumn,
};

pub use paper::{
    Entity as PaperEntity,
    Model as Paper,
    ActiveModel as PaperActiveModel,
    Column as PaperColumn,
};
