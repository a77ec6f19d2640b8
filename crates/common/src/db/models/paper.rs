//! Paper entity (read-only corpus)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "papers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(column_type = "Text", nullable)]
    pub arxiv_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    #[sea_orm(column_name = "abstract", column_type = "Text", nullable)]
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub authors: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub publish_date: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub doi: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub journal_ref: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
