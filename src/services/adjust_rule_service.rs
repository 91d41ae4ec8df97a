use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::entities::adjust_rule_group;
use crate::db::enums::RuleType;
use crate::db::services::{
    AdjustmentHistoryService, InstanceDirectory, LinkKey, NewRuleGroup, RuleGroupChanges, RuleGroupFilter, RuleStore,
};
use crate::error::{AdjustError, AdjustResult};
use crate::links::{GroupGuard, LinkManager};
use crate::rules::{CompileOutcome, RuleCompiler, RuleConfig, RuleTarget};
use crate::services::reconcile_service::{DeleteOutcome, ReconcileService, UnlinkOutcome};
use crate::web::models::{
    CreateRuleGroupRequest, HistoryResponse, LinkVmResponse, LinkedVmRequest, ListRuleGroupsQuery,
    PatchRuleGroupRequest, PatchRuleGroupResponse, RuleGroupDetailResponse, RuleGroupPageResponse, RuleGroupResponse,
    VmLinkResponse,
};

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 1000;
const DETAIL_HISTORY_LIMIT: u64 = 5;
const DEFAULT_HISTORY_LIMIT: u64 = 50;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateOutcome {
    pub groups: usize,
    pub changed: usize,
    pub warnings: Vec<String>,
}

/// Validates a requested link set against the group's rule type.
pub fn normalize_links(rule_type: RuleType, requested: &[LinkedVmRequest]) -> AdjustResult<BTreeSet<LinkKey>> {
    requested.iter().map(|vm| normalize_link(rule_type, vm)).collect()
}

fn normalize_link(rule_type: RuleType, vm: &LinkedVmRequest) -> AdjustResult<LinkKey> {
    let vm_uuid = vm.vm_uuid.trim();
    if vm_uuid.is_empty() {
        return Err(AdjustError::Validation("vmUuid must not be empty".to_string()));
    }
    let device = vm.device.as_deref().map(str::trim).unwrap_or_default();
    match (rule_type.is_bandwidth(), device.is_empty()) {
        (true, true) => Err(AdjustError::Validation(format!(
            "a device is required to link VM {vm_uuid} to a {rule_type} group"
        ))),
        (false, false) => Err(AdjustError::Validation(format!(
            "CPU groups link whole VMs; unexpected device '{device}' for VM {vm_uuid}"
        ))),
        _ => Ok(LinkKey::new(vm_uuid, device)),
    }
}

fn require_non_empty(field: &str, value: &str) -> AdjustResult<()> {
    if value.trim().is_empty() {
        return Err(AdjustError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Rule group lifecycle: every mutation ends with a recompile of the
/// group's rule files, both under the group's lock.
pub struct AdjustRuleService {
    rules: RuleStore,
    links: Arc<LinkManager>,
    compiler: Arc<RuleCompiler>,
    instances: InstanceDirectory,
    history: AdjustmentHistoryService,
    reconciler: Arc<ReconcileService>,
}

impl AdjustRuleService {
    pub fn new(
        rules: RuleStore,
        links: Arc<LinkManager>,
        compiler: Arc<RuleCompiler>,
        instances: InstanceDirectory,
        history: AdjustmentHistoryService,
        reconciler: Arc<ReconcileService>,
    ) -> Self {
        Self {
            rules,
            links,
            compiler,
            instances,
            history,
            reconciler,
        }
    }

    async fn ensure_vms_exist(&self, keys: &BTreeSet<LinkKey>) -> AdjustResult<()> {
        let uuids: BTreeSet<&str> = keys.iter().map(|k| k.vm_uuid.as_str()).collect();
        for uuid in uuids {
            if self.instances.by_uuid(uuid).await?.is_none() {
                return Err(AdjustError::NotFound(format!("VM '{uuid}'")));
            }
        }
        Ok(())
    }

    /// Linked VMs as render targets. Links whose VM no longer exists are
    /// left out of the rules.
    async fn rule_targets(&self, group: &adjust_rule_group::Model) -> AdjustResult<BTreeSet<RuleTarget>> {
        let mut targets = BTreeSet::new();
        for link in self.links.links(&group.uuid).await? {
            match self.instances.by_uuid(&link.vm_uuid).await? {
                Some(vm) => {
                    targets.insert(RuleTarget {
                        domain: vm.domain,
                        device: link.interface,
                        instance_id: vm.uuid,
                    });
                }
                None => {
                    warn!(group_uuid = %group.uuid, vm_uuid = %link.vm_uuid, "Linked VM not found; left out of rules.");
                }
            }
        }
        Ok(targets)
    }

    /// Renders from the links as they stand while `guard` is held.
    pub async fn compile(&self, guard: &GroupGuard, group: &adjust_rule_group::Model) -> AdjustResult<CompileOutcome> {
        guard.check(&group.uuid)?;
        let rule = self.rules.load_rule(group).await?;
        let targets = self.rule_targets(group).await?;
        Ok(self.compiler.apply(group, &rule, &targets).await?)
    }

    async fn detail(&self, group: adjust_rule_group::Model) -> AdjustResult<RuleGroupDetailResponse> {
        let rule = self.rules.load_rule(&group).await?;
        let links = self.link_responses(&group.uuid).await?;
        let recent_history = self
            .history
            .recent_for_group(&group.uuid, DETAIL_HISTORY_LIMIT)
            .await?
            .into_iter()
            .map(HistoryResponse::from)
            .collect();
        Ok(RuleGroupDetailResponse {
            group: group.into(),
            rule: rule.thresholds().clone(),
            links,
            recent_history,
        })
    }

    async fn link_responses(&self, group_uuid: &str) -> AdjustResult<Vec<VmLinkResponse>> {
        Ok(self
            .links
            .links(group_uuid)
            .await?
            .into_iter()
            .map(VmLinkResponse::from)
            .collect())
    }

    pub async fn create(&self, req: CreateRuleGroupRequest) -> AdjustResult<RuleGroupDetailResponse> {
        require_non_empty("name", &req.name)?;
        require_non_empty("ruleId", &req.rule_id)?;
        require_non_empty("owner", &req.owner)?;
        let rule = RuleConfig::new(req.rule_type, req.rule).validate()?;
        let desired = normalize_links(req.rule_type, &req.linked_vms)?;
        self.ensure_vms_exist(&desired).await?;

        let group = self
            .rules
            .create_group(
                NewRuleGroup {
                    name: req.name.trim().to_string(),
                    rule_id: req.rule_id.trim().to_string(),
                    owner: req.owner,
                    region_id: req.region_id,
                    notify_url: req.notify_url,
                    enabled: req.enabled.unwrap_or(true),
                },
                &rule,
            )
            .await?;
        let guard = self.links.lock_group(&group.uuid).await;
        self.links.sync_links(&guard, &group, &desired).await?;
        self.compile(&guard, &group).await?;
        drop(guard);

        info!(
            group_uuid = %group.uuid,
            rule_id = %group.rule_id,
            rule_type = %group.rule_type,
            linked = desired.len(),
            "Rule group created."
        );
        self.detail(group).await
    }

    /// Locks the group, then reads it again so the returned row reflects
    /// every mutation that finished before the lock was granted.
    async fn lock(&self, identifier: &str) -> AdjustResult<(GroupGuard, adjust_rule_group::Model)> {
        let group = self.rules.find_by_identifier(identifier).await?;
        let guard = self.links.lock_group(&group.uuid).await;
        let group = self
            .rules
            .find_by_uuid(&group.uuid)
            .await?
            .ok_or_else(|| AdjustError::NotFound(format!("rule group '{identifier}'")))?;
        Ok((guard, group))
    }

    pub async fn get(&self, identifier: &str) -> AdjustResult<RuleGroupDetailResponse> {
        let group = self.rules.find_by_identifier(identifier).await?;
        self.detail(group).await
    }

    pub async fn list(&self, query: ListRuleGroupsQuery) -> AdjustResult<RuleGroupPageResponse> {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let filter = RuleGroupFilter {
            rule_type: query.rule_type,
            owner: query.owner.filter(|o| !o.is_empty()),
            enabled: query.enabled,
        };
        let (groups, total) = self.rules.list_groups(&filter, page, page_size).await?;
        Ok(RuleGroupPageResponse {
            items: groups.into_iter().map(RuleGroupResponse::from).collect(),
            total,
            page,
            page_size,
        })
    }

    /// Everything is validated before the first write. Links dropped by the
    /// new set are removed without a restore.
    pub async fn patch(&self, identifier: &str, req: PatchRuleGroupRequest) -> AdjustResult<PatchRuleGroupResponse> {
        let (guard, group) = self.lock(identifier).await?;
        if let Some(name) = &req.name {
            require_non_empty("name", name)?;
        }

        let new_rule = match req.rule.filter(|p| !p.is_empty()) {
            Some(patch) => {
                let current = self.rules.load_rule(&group).await?;
                let merged = patch.apply(current.thresholds().clone());
                Some(RuleConfig::new(group.rule_type, merged).validate()?)
            }
            None => None,
        };

        let desired = match &req.linked_vms {
            Some(requested) => {
                let desired = normalize_links(group.rule_type, requested)?;
                self.ensure_vms_exist(&desired).await?;
                Some(desired)
            }
            None => None,
        };

        let group = self
            .rules
            .update_basic(
                group,
                RuleGroupChanges {
                    name: req.name.map(|n| n.trim().to_string()),
                    notify_url: req.notify_url,
                },
            )
            .await?;
        if let Some(rule) = &new_rule {
            self.rules.replace_rule(&group, rule).await?;
        }
        let delta = match &desired {
            Some(desired) => self.links.sync_links(&guard, &group, desired).await?,
            None => Default::default(),
        };
        self.compile(&guard, &group).await?;
        drop(guard);

        info!(
            group_uuid = %group.uuid,
            rule_changed = new_rule.is_some(),
            added = delta.added.len(),
            removed = delta.removed.len(),
            "Rule group updated."
        );
        let links = self.link_responses(&group.uuid).await?;
        Ok(PatchRuleGroupResponse {
            group: group.into(),
            added: delta.added.into_iter().collect(),
            removed: delta.removed.into_iter().collect(),
            links,
        })
    }

    pub async fn set_enabled(&self, identifier: &str, enabled: bool) -> AdjustResult<RuleGroupResponse> {
        let (guard, group) = self.lock(identifier).await?;
        let group = self.rules.set_enabled(group, enabled).await?;
        self.compile(&guard, &group).await?;
        drop(guard);
        info!(group_uuid = %group.uuid, enabled, "Rule group activation changed.");
        Ok(group.into())
    }

    pub async fn link_vm(&self, identifier: &str, vm: LinkedVmRequest) -> AdjustResult<LinkVmResponse> {
        let (guard, group) = self.lock(identifier).await?;
        let key = normalize_link(group.rule_type, &vm)?;
        let linked = self.links.link_vm(&guard, &group, &key).await?;
        self.compile(&guard, &group).await?;
        let links = self.link_responses(&group.uuid).await?;
        Ok(LinkVmResponse { linked, links })
    }

    pub async fn unlink_vm(&self, identifier: &str, vm: LinkedVmRequest) -> AdjustResult<UnlinkOutcome> {
        let (guard, group) = self.lock(identifier).await?;
        let key = normalize_link(group.rule_type, &vm)?;
        let outcome = self.reconciler.unlink_one(&guard, &group, &key).await?;
        self.compile(&guard, &group).await?;
        Ok(outcome)
    }

    pub async fn delete(&self, identifier: &str) -> AdjustResult<DeleteOutcome> {
        let (guard, group) = self.lock(identifier).await?;
        self.reconciler.delete_group(guard, &group).await
    }

    pub async fn links(&self, identifier: &str) -> AdjustResult<Vec<VmLinkResponse>> {
        let group = self.rules.find_by_identifier(identifier).await?;
        self.link_responses(&group.uuid).await
    }

    pub async fn history(&self, identifier: &str, limit: Option<u64>) -> AdjustResult<Vec<HistoryResponse>> {
        let group = self.rules.find_by_identifier(identifier).await?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_PAGE_SIZE);
        Ok(self
            .history
            .recent_for_group(&group.uuid, limit)
            .await?
            .into_iter()
            .map(HistoryResponse::from)
            .collect())
    }

    /// Recompiles every group. A group that fails is reported and skipped.
    pub async fn regenerate_all(&self) -> AdjustResult<RegenerateOutcome> {
        let groups = self.rules.all_groups().await?;
        let mut outcome = RegenerateOutcome {
            groups: groups.len(),
            ..Default::default()
        };
        for group in &groups {
            let guard = self.links.lock_group(&group.uuid).await;
            let compiled = self.compile(&guard, group).await;
            drop(guard);
            match compiled {
                Ok(compiled) if compiled.changed => outcome.changed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(group_uuid = %group.uuid, rule_id = %group.rule_id, error = %e, "Failed to regenerate rules.");
                    outcome.warnings.push(format!("rule group {}: {e}", group.rule_id));
                }
            }
        }
        info!(
            groups = outcome.groups,
            changed = outcome.changed,
            failed = outcome.warnings.len(),
            "Rule regeneration finished."
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(uuid: &str, device: Option<&str>) -> LinkedVmRequest {
        LinkedVmRequest {
            vm_uuid: uuid.to_string(),
            device: device.map(str::to_string),
        }
    }

    #[test]
    fn test_bandwidth_links_require_device() {
        let err = normalize_links(RuleType::BandwidthIn, &[vm("vm-1", None)]).unwrap_err();
        assert!(matches!(err, AdjustError::Validation(_)));

        let keys = normalize_links(RuleType::BandwidthOut, &[vm("vm-1", Some(" tap0a0b0c "))]).unwrap();
        assert_eq!(keys.into_iter().next(), Some(LinkKey::new("vm-1", "tap0a0b0c")));
    }

    #[test]
    fn test_cpu_links_reject_device() {
        assert!(normalize_links(RuleType::Cpu, &[vm("vm-1", Some("tap0a0b0c"))]).is_err());
        assert!(normalize_links(RuleType::Cpu, &[vm("vm-1", Some(""))]).is_ok());
        assert!(normalize_links(RuleType::Cpu, &[vm("  ", None)]).is_err());
    }

    #[test]
    fn test_duplicate_links_collapse() {
        let keys = normalize_links(
            RuleType::BandwidthIn,
            &[vm("vm-1", Some("tap1")), vm("vm-1", Some("tap1")), vm("vm-1", Some("tap2"))],
        )
        .unwrap();
        assert_eq!(keys.len(), 2);
    }
}
