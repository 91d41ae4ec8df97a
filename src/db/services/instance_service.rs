use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;

use crate::db::entities::{instance, instance_interface};

const DOMAIN_PREFIX: &str = "inst-";

/// Hypervisor domain name of an instance.
pub fn domain_for(instance_id: i32) -> String {
    format!("{DOMAIN_PREFIX}{instance_id}")
}

/// Numeric instance id carried by a domain name such as `inst-42`.
pub fn parse_domain(domain: &str) -> Option<i32> {
    domain.strip_prefix(DOMAIN_PREFIX)?.parse().ok()
}

/// Where a VM lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmPlacement {
    pub instance_id: i32,
    pub uuid: String,
    pub domain: String,
    pub hyper_id: i32,
}

impl From<instance::Model> for VmPlacement {
    fn from(model: instance::Model) -> Self {
        Self {
            domain: domain_for(model.id),
            instance_id: model.id,
            uuid: model.uuid,
            hyper_id: model.hyper_id,
        }
    }
}

/// Read-only view over the instance tables owned by the wider platform.
#[derive(Clone)]
pub struct InstanceDirectory {
    db: Arc<DatabaseConnection>,
}

impl InstanceDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn by_uuid(&self, vm_uuid: &str) -> Result<Option<VmPlacement>, DbErr> {
        Ok(instance::Entity::find()
            .filter(instance::Column::Uuid.eq(vm_uuid))
            .one(self.db.as_ref())
            .await?
            .map(VmPlacement::from))
    }

    pub async fn by_domain(&self, domain: &str) -> Result<Option<VmPlacement>, DbErr> {
        let Some(id) = parse_domain(domain) else {
            return Ok(None);
        };
        Ok(instance::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(VmPlacement::from))
    }

    /// Resolves by VM uuid when one is given, by domain name otherwise.
    pub async fn resolve(&self, vm_uuid: Option<&str>, domain: &str) -> Result<Option<VmPlacement>, DbErr> {
        match vm_uuid.filter(|u| !u.is_empty()) {
            Some(uuid) => self.by_uuid(uuid).await,
            None => self.by_domain(domain).await,
        }
    }

    /// The interface whose tap device name matches `device`.
    pub async fn interface_for_device(
        &self,
        instance_id: i32,
        device: &str,
    ) -> Result<Option<instance_interface::Model>, DbErr> {
        let interfaces = instance_interface::Entity::find()
            .filter(instance_interface::Column::InstanceId.eq(instance_id))
            .all(self.db.as_ref())
            .await?;
        Ok(interfaces
            .into_iter()
            .find(|iface| iface.target_device().as_deref() == Some(device)))
    }

    /// Interfaces of every active instance, optionally limited to one host.
    pub async fn active_interfaces(
        &self,
        hyper_id: Option<i32>,
    ) -> Result<Vec<(VmPlacement, instance_interface::Model)>, DbErr> {
        let mut query = instance::Entity::find()
            .filter(instance::Column::Status.eq("active"))
            .order_by_asc(instance::Column::Id);
        if let Some(hyper_id) = hyper_id {
            query = query.filter(instance::Column::HyperId.eq(hyper_id));
        }
        let rows = query
            .find_with_related(instance_interface::Entity)
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .flat_map(|(inst, ifaces)| {
                let placement = VmPlacement::from(inst);
                ifaces.into_iter().map(move |iface| (placement.clone(), iface))
            })
            .collect())
    }
}
