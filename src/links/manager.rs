use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::db::entities::{adjust_rule_group, vm_rule_link};
use crate::db::services::{InstanceDirectory, LinkKey, VmLinkService, VmPlacement};
use crate::error::{AdjustError, AdjustResult};
use crate::links::manifest::{ManifestEntry, ManifestStore};

/// Links added and removed by one [`LinkManager::sync_links`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDelta {
    pub added: BTreeSet<LinkKey>,
    pub removed: BTreeSet<LinkKey>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Exclusive hold on one rule group. Link mutations require it, and callers
/// keep it until the group's rule files are recompiled.
pub struct GroupGuard {
    group_uuid: String,
    _guard: OwnedMutexGuard<()>,
}

impl GroupGuard {
    pub fn group_uuid(&self) -> &str {
        &self.group_uuid
    }

    pub(crate) fn check(&self, group_uuid: &str) -> AdjustResult<()> {
        if self.group_uuid != group_uuid {
            return Err(AdjustError::Integrity(format!(
                "lock of rule group {} used to modify rule group {group_uuid}",
                self.group_uuid
            )));
        }
        Ok(())
    }
}

/// Keeps link rows and the manifest in step. Every mutation of a group's
/// links runs under that group's [`GroupGuard`].
pub struct LinkManager {
    links: VmLinkService,
    instances: InstanceDirectory,
    manifest: Arc<ManifestStore>,
    group_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LinkManager {
    pub fn new(links: VmLinkService, instances: InstanceDirectory, manifest: Arc<ManifestStore>) -> Self {
        Self {
            links,
            instances,
            manifest,
            group_locks: DashMap::new(),
        }
    }

    /// Waits for exclusive hold on a group. Not reentrant.
    pub async fn lock_group(&self, group_uuid: &str) -> GroupGuard {
        let lock = self
            .group_locks
            .entry(group_uuid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        GroupGuard {
            group_uuid: group_uuid.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    pub async fn links(&self, group_uuid: &str) -> AdjustResult<Vec<vm_rule_link::Model>> {
        Ok(self.links.list(group_uuid).await?)
    }

    pub async fn keys(&self, group_uuid: &str) -> AdjustResult<BTreeSet<LinkKey>> {
        Ok(self.links.keys(group_uuid).await?)
    }

    pub async fn links_for_vm(&self, group_uuid: &str, vm_uuid: &str) -> AdjustResult<Vec<vm_rule_link::Model>> {
        Ok(self.links.links_for_vm(group_uuid, vm_uuid).await?)
    }

    async fn resolve(&self, vm_uuid: &str) -> AdjustResult<VmPlacement> {
        self.instances
            .by_uuid(vm_uuid)
            .await?
            .ok_or_else(|| AdjustError::NotFound(format!("VM '{vm_uuid}'")))
    }

    fn manifest_entry(&self, group: &adjust_rule_group::Model, vm: &VmPlacement, key: &LinkKey) -> ManifestEntry {
        let rule_id = group.rule_type.status_rule_id(&vm.domain, &group.uuid);
        self.manifest.entry(&vm.domain, &rule_id, &key.vm_uuid, &key.interface)
    }

    /// Idempotent. Returns `true` when a new row was written.
    pub async fn link_vm(
        &self,
        guard: &GroupGuard,
        group: &adjust_rule_group::Model,
        key: &LinkKey,
    ) -> AdjustResult<bool> {
        guard.check(&group.uuid)?;
        let vm = self.resolve(&key.vm_uuid).await?;
        let inserted = self.links.insert_if_absent(&group.uuid, key).await?;
        self.manifest.upsert(vec![self.manifest_entry(group, &vm, key)]).await?;
        if inserted {
            info!(group_uuid = %group.uuid, vm_uuid = %key.vm_uuid, device = %key.interface, "VM linked.");
        }
        Ok(inserted)
    }

    /// Idempotent. Returns `true` when a row was removed.
    pub async fn unlink_vm(
        &self,
        guard: &GroupGuard,
        group: &adjust_rule_group::Model,
        key: &LinkKey,
    ) -> AdjustResult<bool> {
        guard.check(&group.uuid)?;
        let removed = self.links.delete(&group.uuid, key).await?;
        self.manifest.remove_links(&group.uuid, std::slice::from_ref(key)).await?;
        if removed {
            info!(group_uuid = %group.uuid, vm_uuid = %key.vm_uuid, device = %key.interface, "VM unlinked.");
        }
        Ok(removed)
    }

    /// Brings the group's links to exactly `desired`. Every added VM is
    /// resolved before anything is written.
    pub async fn sync_links(
        &self,
        guard: &GroupGuard,
        group: &adjust_rule_group::Model,
        desired: &BTreeSet<LinkKey>,
    ) -> AdjustResult<SyncDelta> {
        guard.check(&group.uuid)?;
        let current = self.links.keys(&group.uuid).await?;
        let delta = SyncDelta {
            added: desired.difference(&current).cloned().collect(),
            removed: current.difference(desired).cloned().collect(),
        };
        if delta.is_empty() {
            debug!(group_uuid = %group.uuid, "Links already in sync.");
            return Ok(delta);
        }

        let mut entries = Vec::with_capacity(delta.added.len());
        for key in &delta.added {
            let vm = self.resolve(&key.vm_uuid).await?;
            entries.push(self.manifest_entry(group, &vm, key));
        }

        self.links.apply_delta(&group.uuid, &delta.added, &delta.removed).await?;
        let removed: Vec<LinkKey> = delta.removed.iter().cloned().collect();
        self.manifest.remove_links(&group.uuid, &removed).await?;
        self.manifest.upsert(entries).await?;

        info!(
            group_uuid = %group.uuid,
            added = delta.added.len(),
            removed = delta.removed.len(),
            "Links synchronized."
        );
        Ok(delta)
    }

    /// Deletes all link rows and manifest entries of a group.
    pub async fn clear_group(&self, guard: &GroupGuard, group_uuid: &str) -> AdjustResult<u64> {
        guard.check(group_uuid)?;
        let removed = self.links.delete_all(group_uuid).await?;
        self.manifest.remove_group(group_uuid).await?;
        Ok(removed)
    }

    /// Drops the lock entry of a deleted group. Takes the guard so the entry
    /// goes away only after the teardown that held it.
    pub fn forget_group(&self, guard: GroupGuard) {
        self.group_locks.remove(&guard.group_uuid);
    }
}
