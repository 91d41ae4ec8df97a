use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::BwDirection;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bw_rule_details")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub group_uuid: String,
    pub name: String,
    pub direction: BwDirection,
    pub trigger_threshold_pct: f64,
    pub recover_threshold_pct: f64,
    pub smooth_window: i32,
    pub trigger_duration: i32,
    pub limit_duration: i32,
    /// Share of the configured interface bandwidth kept while limited, 1..=100.
    pub limit_value_pct: i32,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::adjust_rule_group::Entity",
        from = "Column::GroupUuid",
        to = "super::adjust_rule_group::Column::Uuid",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    AdjustRuleGroup,
}

impl Related<super::adjust_rule_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AdjustRuleGroup.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
