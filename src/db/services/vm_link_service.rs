use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::db::entities::vm_rule_link;

/// Identity of a link inside one group. `interface` is empty for CPU groups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkKey {
    pub vm_uuid: String,
    #[serde(default)]
    pub interface: String,
}

impl LinkKey {
    pub fn new(vm_uuid: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            vm_uuid: vm_uuid.into(),
            interface: interface.into(),
        }
    }
}

impl From<&vm_rule_link::Model> for LinkKey {
    fn from(model: &vm_rule_link::Model) -> Self {
        LinkKey::new(model.vm_uuid.clone(), model.interface.clone())
    }
}

async fn find_link<C: ConnectionTrait>(
    conn: &C,
    group_uuid: &str,
    key: &LinkKey,
) -> Result<Option<vm_rule_link::Model>, DbErr> {
    vm_rule_link::Entity::find()
        .filter(vm_rule_link::Column::GroupUuid.eq(group_uuid))
        .filter(vm_rule_link::Column::VmUuid.eq(key.vm_uuid.as_str()))
        .filter(vm_rule_link::Column::Interface.eq(key.interface.as_str()))
        .one(conn)
        .await
}

async fn insert_link<C: ConnectionTrait>(conn: &C, group_uuid: &str, key: &LinkKey) -> Result<bool, DbErr> {
    if find_link(conn, group_uuid, key).await?.is_some() {
        return Ok(false);
    }
    vm_rule_link::ActiveModel {
        group_uuid: Set(group_uuid.to_string()),
        vm_uuid: Set(key.vm_uuid.clone()),
        interface: Set(key.interface.clone()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(true)
}

async fn delete_link<C: ConnectionTrait>(conn: &C, group_uuid: &str, key: &LinkKey) -> Result<bool, DbErr> {
    let result = vm_rule_link::Entity::delete_many()
        .filter(vm_rule_link::Column::GroupUuid.eq(group_uuid))
        .filter(vm_rule_link::Column::VmUuid.eq(key.vm_uuid.as_str()))
        .filter(vm_rule_link::Column::Interface.eq(key.interface.as_str()))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Link rows of the rule groups. Writes for a group must be serialized by
/// the caller.
#[derive(Clone)]
pub struct VmLinkService {
    db: Arc<DatabaseConnection>,
}

impl VmLinkService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list(&self, group_uuid: &str) -> Result<Vec<vm_rule_link::Model>, DbErr> {
        vm_rule_link::Entity::find()
            .filter(vm_rule_link::Column::GroupUuid.eq(group_uuid))
            .order_by_asc(vm_rule_link::Column::VmUuid)
            .order_by_asc(vm_rule_link::Column::Interface)
            .all(self.db.as_ref())
            .await
    }

    pub async fn keys(&self, group_uuid: &str) -> Result<BTreeSet<LinkKey>, DbErr> {
        Ok(self.list(group_uuid).await?.iter().map(LinkKey::from).collect())
    }

    /// Rows of one VM in a group, across all its interfaces.
    pub async fn links_for_vm(&self, group_uuid: &str, vm_uuid: &str) -> Result<Vec<vm_rule_link::Model>, DbErr> {
        vm_rule_link::Entity::find()
            .filter(vm_rule_link::Column::GroupUuid.eq(group_uuid))
            .filter(vm_rule_link::Column::VmUuid.eq(vm_uuid))
            .order_by_asc(vm_rule_link::Column::Interface)
            .all(self.db.as_ref())
            .await
    }

    /// Returns `false` when the row already existed.
    pub async fn insert_if_absent(&self, group_uuid: &str, key: &LinkKey) -> Result<bool, DbErr> {
        insert_link(self.db.as_ref(), group_uuid, key).await
    }

    /// Returns `false` when there was nothing to delete.
    pub async fn delete(&self, group_uuid: &str, key: &LinkKey) -> Result<bool, DbErr> {
        delete_link(self.db.as_ref(), group_uuid, key).await
    }

    /// Applies an add/remove delta in one transaction.
    pub async fn apply_delta(
        &self,
        group_uuid: &str,
        added: &BTreeSet<LinkKey>,
        removed: &BTreeSet<LinkKey>,
    ) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;
        for key in removed {
            delete_link(&txn, group_uuid, key).await?;
        }
        for key in added {
            insert_link(&txn, group_uuid, key).await?;
        }
        txn.commit().await
    }

    pub async fn delete_all(&self, group_uuid: &str) -> Result<u64, DbErr> {
        let result = vm_rule_link::Entity::delete_many()
            .filter(vm_rule_link::Column::GroupUuid.eq(group_uuid))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
