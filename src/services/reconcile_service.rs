use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::entities::adjust_rule_group;
use crate::db::services::{InstanceDirectory, LinkKey, RuleStore, VmPlacement};
use crate::error::{AdjustError, AdjustResult};
use crate::links::{GroupGuard, LinkManager};
use crate::monitoring::{StatusOracle, StatusQuery};
use crate::remediation::{commands, ActionType, AdjustmentRequest, RemediationExecutor};
use crate::rules::RuleCompiler;
use crate::server::command_dispatcher::{CommandDispatcher, FanOutReport};

/// What the restore-if-limited step did for one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "details")]
pub enum RestoreStep {
    NotLimited,
    Restored,
    Failed(String),
    /// The status query failed; no restore was issued.
    StatusUnknown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub rule_id: String,
    pub group_uuid: String,
    pub restore_attempts: usize,
    pub restored: usize,
    pub removed_links: u64,
    pub removed_files: Vec<String>,
    pub host_cleanup: FanOutReport,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlinkOutcome {
    pub vm_uuid: String,
    pub device: String,
    pub removed: bool,
    pub restore: Option<RestoreStep>,
    pub warnings: Vec<String>,
}

/// Best-effort teardown: restores limited VMs before links, files and
/// host metrics of a group go away.
pub struct ReconcileService {
    rules: RuleStore,
    links: Arc<LinkManager>,
    compiler: Arc<RuleCompiler>,
    instances: InstanceDirectory,
    oracle: Arc<StatusOracle>,
    executor: Arc<RemediationExecutor>,
    dispatcher: CommandDispatcher,
}

impl ReconcileService {
    pub fn new(
        rules: RuleStore,
        links: Arc<LinkManager>,
        compiler: Arc<RuleCompiler>,
        instances: InstanceDirectory,
        oracle: Arc<StatusOracle>,
        executor: Arc<RemediationExecutor>,
        dispatcher: CommandDispatcher,
    ) -> Self {
        Self {
            rules,
            links,
            compiler,
            instances,
            oracle,
            executor,
            dispatcher,
        }
    }

    async fn restore_if_limited(
        &self,
        group: &adjust_rule_group::Model,
        vm: &VmPlacement,
        device: &str,
    ) -> RestoreStep {
        let status_rule_id = group.rule_type.status_rule_id(&vm.domain, &group.uuid);
        let query = StatusQuery {
            domain: &vm.domain,
            rule_id: &status_rule_id,
            rule_type: group.rule_type,
            device: Some(device).filter(|d| !d.is_empty()),
        };
        match self.oracle.status(&query).await.needs_restore() {
            None => RestoreStep::StatusUnknown,
            Some(false) => RestoreStep::NotLimited,
            Some(true) => {
                let request = AdjustmentRequest {
                    action: ActionType::restore_for(group.rule_type),
                    domain: vm.domain.clone(),
                    status_rule_id,
                    group_uuid: group.uuid.clone(),
                    global_rule_id: group.rule_id.clone(),
                    target_device: device.to_string(),
                    instance_id: vm.uuid.clone(),
                };
                let outcome = self.executor.execute(&request).await;
                if outcome.success {
                    RestoreStep::Restored
                } else {
                    RestoreStep::Failed(outcome.details)
                }
            }
        }
    }

    fn restore_warning(step: &RestoreStep, vm_uuid: &str, device: &str) -> Option<String> {
        match step {
            RestoreStep::Failed(details) => Some(format!("restore of VM {vm_uuid} {device} failed: {details}")),
            RestoreStep::StatusUnknown => Some(format!(
                "adjustment status of VM {vm_uuid} {device} is unknown; restore skipped"
            )),
            RestoreStep::NotLimited | RestoreStep::Restored => None,
        }
    }

    /// Tears a group down. Individual restore and host failures become
    /// warnings; the group is deleted regardless.
    pub async fn delete_group(&self, guard: GroupGuard, group: &adjust_rule_group::Model) -> AdjustResult<DeleteOutcome> {
        let links = self.links.links(&group.uuid).await?;
        let mut warnings = Vec::new();
        let mut hosts = BTreeSet::new();
        let mut restore_attempts = 0;
        let mut restored = 0;

        for link in &links {
            let vm = match self.instances.by_uuid(&link.vm_uuid).await {
                Ok(Some(vm)) => vm,
                Ok(None) => {
                    warn!(group_uuid = %group.uuid, vm_uuid = %link.vm_uuid, "Linked VM not found; skipping restore.");
                    warnings.push(format!("VM {} could not be resolved; restore skipped", link.vm_uuid));
                    continue;
                }
                Err(e) => {
                    warn!(group_uuid = %group.uuid, vm_uuid = %link.vm_uuid, error = %e, "Failed to resolve linked VM.");
                    warnings.push(format!("VM {} could not be resolved ({e}); restore skipped", link.vm_uuid));
                    continue;
                }
            };
            hosts.insert(vm.hyper_id);

            let step = self.restore_if_limited(group, &vm, &link.interface).await;
            if matches!(step, RestoreStep::Restored | RestoreStep::Failed(_)) {
                restore_attempts += 1;
            }
            if step == RestoreStep::Restored {
                restored += 1;
            }
            warnings.extend(Self::restore_warning(&step, &link.vm_uuid, &link.interface));
        }

        let removed_files = match self.compiler.remove_files(group) {
            Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
            Err(e) => {
                warn!(group_uuid = %group.uuid, error = %e, "Failed to remove rule files.");
                warnings.push(format!("rule files could not be removed: {e}"));
                Vec::new()
            }
        };

        let host_cleanup = match commands::cleanup_rule_metrics(&group.uuid, group.rule_type) {
            Ok(cleanup) => self.dispatcher.fan_out(&hosts, |_| cleanup.clone()).await,
            Err(e) => {
                warn!(group_uuid = %group.uuid, error = %e, "Metric cleanup command could not be built.");
                warnings.push(format!("metric cleanup skipped: {e}"));
                FanOutReport::default()
            }
        };
        for (hyper_id, reason) in &host_cleanup.failed {
            warnings.push(format!("metric cleanup on host {hyper_id} failed: {reason}"));
        }

        let removed_links = self.links.clear_group(&guard, &group.uuid).await?;
        self.rules.delete_group(&group.uuid).await?;
        self.compiler.reload().await;
        self.links.forget_group(guard);

        info!(
            group_uuid = %group.uuid,
            rule_id = %group.rule_id,
            restore_attempts,
            restored,
            warnings = warnings.len(),
            "Rule group deleted."
        );
        Ok(DeleteOutcome {
            rule_id: group.rule_id.clone(),
            group_uuid: group.uuid.clone(),
            restore_attempts,
            restored,
            removed_links,
            removed_files,
            host_cleanup,
            warnings,
        })
    }

    /// Restores the (VM, device) pair if limited, then removes its link and
    /// zeroes its status gauge.
    pub async fn unlink_one(
        &self,
        guard: &GroupGuard,
        group: &adjust_rule_group::Model,
        key: &LinkKey,
    ) -> AdjustResult<UnlinkOutcome> {
        let rows = self.links.links_for_vm(&group.uuid, &key.vm_uuid).await?;
        if rows.is_empty() {
            return Err(AdjustError::NotFound(format!(
                "VM {} is not linked to rule group {}",
                key.vm_uuid, group.uuid
            )));
        }
        if !rows.iter().any(|row| row.interface == key.interface) {
            let devices: Vec<&str> = rows.iter().map(|row| row.interface.as_str()).collect();
            return Err(AdjustError::NotFound(format!(
                "VM {} is not linked to rule group {} on device '{}'; linked devices: {}",
                key.vm_uuid,
                group.uuid,
                key.interface,
                devices.join(", ")
            )));
        }

        let mut warnings = Vec::new();
        let vm = match self.instances.by_uuid(&key.vm_uuid).await {
            Ok(vm) => vm,
            Err(e) => {
                warn!(vm_uuid = %key.vm_uuid, error = %e, "Failed to resolve VM for unlink.");
                None
            }
        };

        let restore = match &vm {
            Some(vm) => {
                let step = self.restore_if_limited(group, vm, &key.interface).await;
                warnings.extend(Self::restore_warning(&step, &key.vm_uuid, &key.interface));
                Some(step)
            }
            None => {
                warnings.push(format!("VM {} could not be resolved; restore skipped", key.vm_uuid));
                None
            }
        };

        let removed = self.links.unlink_vm(guard, group, key).await?;

        if let Some(vm) = &vm {
            let status_rule_id = group.rule_type.status_rule_id(&vm.domain, &group.uuid);
            self.executor
                .publish_status(vm, group.rule_type, &status_rule_id, &key.interface, 0)
                .await;
        }

        Ok(UnlinkOutcome {
            vm_uuid: key.vm_uuid.clone(),
            device: key.interface.clone(),
            removed,
            restore,
            warnings,
        })
    }
}
