use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "instance_interfaces")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub instance_id: i32,
    pub mac_addr: String,
    /// Mbps, 0 means unlimited.
    pub inbound: i32,
    pub outbound: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::instance::Entity",
        from = "Column::InstanceId",
        to = "super::instance::Column::Id",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    Instance,
}

impl Related<super::instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Instance.def()
    }
}

impl Model {
    /// Name of the host tap device backing this interface.
    pub fn target_device(&self) -> Option<String> {
        let hex: Vec<char> = self.mac_addr.chars().filter(|c| *c != ':').collect();
        if hex.len() < 6 {
            return None;
        }
        let tail: String = hex[hex.len() - 6..].iter().collect();
        Some(format!("tap{}", tail.to_lowercase()))
    }
}

impl ActiveModelBehavior for ActiveModel {}
