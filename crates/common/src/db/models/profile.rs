//! Profile entity
//!
//! One row per user; the id is assigned by the auth provider.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "profiles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", nullable)]
    pub email: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub full_name: Option<String>,

    /// Never negative; only the credit ledger and the payment reconciler write it
    pub credits_remaining: i32,

    /// Product access gate, independent of credits
    pub whitelisted: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::search::Entity")]
    Searches,

    #[sea_orm(has_many = "super::credit_purchase::Entity")]
    CreditPurchases,
}

impl Related<super::search::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Searches.def()
    }
}

impl Related<super::credit_purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CreditPurchases.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
