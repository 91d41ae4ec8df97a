use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Instance rows are owned by the wider platform; this crate only reads them.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "instances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub uuid: String,
    pub hyper_id: i32,
    pub status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::instance_interface::Entity")]
    InstanceInterface,
}

impl Related<super::instance_interface::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InstanceInterface.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
