use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::RuleType;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "adjust_rule_groups")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub uuid: String,
    /// External rule id supplied by the caller; unique among groups.
    #[sea_orm(unique)]
    pub rule_id: String,
    pub name: String,
    pub rule_type: RuleType,
    pub owner: String,
    pub enabled: bool,
    pub region_id: String,
    pub notify_url: String,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cpu_rule_detail::Entity")]
    CpuRuleDetail,
    #[sea_orm(has_many = "super::bw_rule_detail::Entity")]
    BwRuleDetail,
    #[sea_orm(has_many = "super::vm_rule_link::Entity")]
    VmRuleLink,
}

impl Related<super::cpu_rule_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CpuRuleDetail.def()
    }
}

impl Related<super::bw_rule_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BwRuleDetail.def()
    }
}

impl Related<super::vm_rule_link::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VmRuleLink.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
