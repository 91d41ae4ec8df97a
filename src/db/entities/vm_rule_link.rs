use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vm_rule_links")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub group_uuid: String,
    pub vm_uuid: String,
    /// Empty for CPU groups.
    pub interface: String,
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
