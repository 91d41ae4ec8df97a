use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::AdjustmentStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "adjustment_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub domain_name: String,
    pub rule_id: String,
    pub group_uuid: String,
    pub action_type: String,
    pub status: AdjustmentStatus,
    #[sea_orm(column_type = "Text")]
    pub details: String,
    pub adjust_time: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
