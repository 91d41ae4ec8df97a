use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::db::entities::adjust_rule_group;
use crate::db::enums::{AdjustmentStatus, BwDirection, RuleType};
use crate::db::services::{AdjustmentHistoryService, InstanceDirectory, NewAdjustment, RuleStore, VmPlacement};
use crate::error::{AdjustError, AdjustResult};
use crate::monitoring::PrometheusClient;
use crate::remediation::action::ActionType;
use crate::remediation::commands;
use crate::server::command_dispatcher::CommandDispatcher;

/// One remediation to run.
#[derive(Debug, Clone)]
pub struct AdjustmentRequest {
    pub action: ActionType,
    pub domain: String,
    /// Per-VM rule id carried by the status gauges.
    pub status_rule_id: String,
    /// Group uuid from the `rule_group` label; may be empty.
    pub group_uuid: String,
    /// External rule id from the `global_rule_id` label; may be empty.
    pub global_rule_id: String,
    /// Tap device for bandwidth actions, empty otherwise.
    pub target_device: String,
    /// VM uuid when known; the domain is used otherwise.
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub details: String,
}

/// Dispatches limit/restore commands and records every attempt.
pub struct RemediationExecutor {
    dispatcher: CommandDispatcher,
    instances: InstanceDirectory,
    rules: RuleStore,
    history: AdjustmentHistoryService,
    prometheus: Arc<PrometheusClient>,
}

impl RemediationExecutor {
    pub fn new(
        dispatcher: CommandDispatcher,
        instances: InstanceDirectory,
        rules: RuleStore,
        history: AdjustmentHistoryService,
        prometheus: Arc<PrometheusClient>,
    ) -> Self {
        Self {
            dispatcher,
            instances,
            rules,
            history,
            prometheus,
        }
    }

    /// Runs the action and writes its history row. Never fails: the outcome
    /// says whether the host confirmed the command.
    pub async fn execute(&self, request: &AdjustmentRequest) -> DispatchOutcome {
        if request.action == ActionType::ConfigMissing {
            info!(
                domain = %request.domain,
                device = %request.target_device,
                "Bandwidth config missing for interface; notification only."
            );
            return DispatchOutcome {
                success: true,
                details: "Bandwidth configuration missing; notification only".to_string(),
            };
        }

        let started = Instant::now();
        let group = match self.find_group(request).await {
            Ok(group) => group,
            Err(e) => {
                warn!(domain = %request.domain, rule_id = %request.status_rule_id, error = %e, "Rule group lookup failed.");
                None
            }
        };
        let new = NewAdjustment {
            domain_name: request.domain.clone(),
            rule_id: request.status_rule_id.clone(),
            group_uuid: group
                .as_ref()
                .map(|g| g.uuid.clone())
                .unwrap_or_else(|| request.group_uuid.clone()),
            action_type: request.action.to_string(),
        };
        let opened = match self.history.start(new.clone()).await {
            Ok(row) => Some(row.id),
            Err(e) => {
                warn!(domain = %request.domain, action = %request.action, error = %e, "Could not open history row.");
                None
            }
        };

        let result = self.run(request, group.as_ref()).await;
        let (status, details) = match &result {
            Ok(summary) => {
                info!(
                    domain = %request.domain,
                    rule_id = %request.status_rule_id,
                    action = %request.action,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Adjustment completed."
                );
                (
                    AdjustmentStatus::Completed,
                    format!("Successfully processed {}: {summary}", request.action),
                )
            }
            Err(e) => {
                error!(
                    domain = %request.domain,
                    rule_id = %request.status_rule_id,
                    group_uuid = %new.group_uuid,
                    action = %request.action,
                    device = %request.target_device,
                    error = %e,
                    "Adjustment failed."
                );
                (
                    AdjustmentStatus::Failed,
                    format!("Processing {} failed: {e}", request.action),
                )
            }
        };

        let recorded = match opened {
            Some(id) => self.history.finish(id, status, details.clone()).await,
            None => self.history.record_final(new, status, details.clone()).await,
        };
        if let Err(e) = recorded {
            error!(domain = %request.domain, action = %request.action, error = %e, "Failed to record adjustment history.");
        }

        DispatchOutcome {
            success: result.is_ok(),
            details,
        }
    }

    /// Finds the rule group behind an alert: the `rule_group` label first,
    /// then the external rule id, then the uuid suffix of the per-VM rule id.
    async fn find_group(&self, request: &AdjustmentRequest) -> AdjustResult<Option<adjust_rule_group::Model>> {
        if !request.group_uuid.is_empty() {
            return self.rules.find_by_uuid(&request.group_uuid).await;
        }
        if !request.global_rule_id.is_empty() {
            if let Some(group) = self.rules.find_by_rule_id(&request.global_rule_id).await? {
                return Ok(Some(group));
            }
        }
        match group_uuid_from_rule_id(&request.status_rule_id, &request.domain) {
            Some(uuid) => self.rules.find_by_uuid(uuid).await,
            None => Ok(None),
        }
    }

    async fn run(
        &self,
        request: &AdjustmentRequest,
        group: Option<&adjust_rule_group::Model>,
    ) -> AdjustResult<String> {
        let vm = self
            .instances
            .resolve(Some(&request.instance_id), &request.domain)
            .await?
            .ok_or_else(|| AdjustError::NotFound(format!("instance for domain '{}'", request.domain)))?;

        match request.action {
            ActionType::LimitCpu => {
                let pct = self.limit_percent(request, group, RuleType::Cpu).await?;
                self.dispatcher
                    .dispatch(vm.hyper_id, &commands::cpu_limit(&vm.domain, pct)?)
                    .await?;
                self.publish_status(&vm, RuleType::Cpu, &request.status_rule_id, "", 1).await;
                Ok(format!("CPU of {} limited to {pct}%", vm.domain))
            }
            ActionType::RestoreCpu => {
                self.dispatcher
                    .dispatch(vm.hyper_id, &commands::cpu_restore(&vm.domain)?)
                    .await?;
                self.publish_status(&vm, RuleType::Cpu, &request.status_rule_id, "", 0).await;
                Ok(format!("CPU of {} restored", vm.domain))
            }
            ActionType::LimitInBw => self.limit_bandwidth(&vm, request, group, BwDirection::In).await,
            ActionType::RestoreInBw => self.restore_bandwidth(&vm, request, BwDirection::In).await,
            ActionType::LimitOutBw => self.limit_bandwidth(&vm, request, group, BwDirection::Out).await,
            ActionType::RestoreOutBw => self.restore_bandwidth(&vm, request, BwDirection::Out).await,
            ActionType::ConfigMissing => Ok("notification only".to_string()),
        }
    }

    async fn limit_percent(
        &self,
        request: &AdjustmentRequest,
        group: Option<&adjust_rule_group::Model>,
        expected: RuleType,
    ) -> AdjustResult<i32> {
        let group = group.ok_or_else(|| {
            AdjustError::NotFound(format!(
                "rule group for rule_group='{}', global_rule_id='{}', rule_id='{}'",
                request.group_uuid, request.global_rule_id, request.status_rule_id
            ))
        })?;
        let rule = self.rules.load_rule(group).await?;
        if rule.rule_type() != expected {
            return Err(AdjustError::Validation(format!(
                "rule group {} is a {} group, not {expected}",
                group.uuid,
                rule.rule_type()
            )));
        }
        Ok(rule.thresholds().limit_percent)
    }

    async fn limit_bandwidth(
        &self,
        vm: &VmPlacement,
        request: &AdjustmentRequest,
        group: Option<&adjust_rule_group::Model>,
        direction: BwDirection,
    ) -> AdjustResult<String> {
        let device = required_device(request)?;
        let rule_type = rule_type_for(direction);
        let pct = self.limit_percent(request, group, rule_type).await?;

        let total = match self.prometheus.bandwidth_config(&vm.domain, device).await {
            Ok(Some(config)) => config.total(direction),
            Ok(None) => {
                info!(domain = %vm.domain, device = %device, "Bandwidth config not found; treating as unlimited.");
                0.0
            }
            Err(e) => {
                warn!(domain = %vm.domain, device = %device, error = %e, "Bandwidth config query failed; treating as unlimited.");
                0.0
            }
        };

        let summary = if total > 0.0 {
            // A zero speed means unlimited to the host script.
            let limit = ((total * f64::from(pct) / 100.0).floor() as i64).max(1);
            self.dispatcher
                .dispatch(vm.hyper_id, &commands::nic_limit(vm.instance_id, device, direction, limit)?)
                .await?;
            format!("{direction}bound bandwidth of {device} limited to {limit} Mbps ({pct}% of {total} Mbps)")
        } else {
            format!("{direction}bound bandwidth of {device} is unlimited; no speed change sent")
        };

        self.publish_status(vm, rule_type, &request.status_rule_id, device, 1).await;
        Ok(summary)
    }

    async fn restore_bandwidth(
        &self,
        vm: &VmPlacement,
        request: &AdjustmentRequest,
        direction: BwDirection,
    ) -> AdjustResult<String> {
        let device = required_device(request)?;
        let iface = self
            .instances
            .interface_for_device(vm.instance_id, device)
            .await?
            .ok_or_else(|| AdjustError::NotFound(format!("interface '{device}' of {}", vm.domain)))?;

        let summary = if iface.inbound > 0 || iface.outbound > 0 {
            self.dispatcher
                .dispatch(
                    vm.hyper_id,
                    &commands::nic_restore(vm.instance_id, device, iface.inbound, iface.outbound)?,
                )
                .await?;
            format!(
                "bandwidth of {device} restored to {}/{} Mbps",
                iface.inbound, iface.outbound
            )
        } else {
            format!("bandwidth of {device} has no configured limit; no speed change sent")
        };

        self.publish_status(vm, rule_type_for(direction), &request.status_rule_id, device, 0)
            .await;
        Ok(summary)
    }

    /// Updates the status gauge on the VM's host. Failure is only logged.
    pub async fn publish_status(&self, vm: &VmPlacement, rule_type: RuleType, rule_id: &str, device: &str, status: u8) {
        let sent = match commands::status_update(rule_type, &vm.domain, rule_id, device, status) {
            Ok(command) => self.dispatcher.dispatch(vm.hyper_id, &command).await.map_err(AdjustError::from),
            Err(e) => Err(AdjustError::from(e)),
        };
        if let Err(e) = sent {
            warn!(
                domain = %vm.domain,
                rule_id = %rule_id,
                rule_type = %rule_type,
                status,
                error = %e,
                "Failed to update adjustment status metric."
            );
        }
    }
}

fn required_device(request: &AdjustmentRequest) -> AdjustResult<&str> {
    if request.target_device.is_empty() {
        return Err(AdjustError::Validation(format!(
            "{} requires a target device",
            request.action
        )));
    }
    Ok(&request.target_device)
}

fn rule_type_for(direction: BwDirection) -> RuleType {
    match direction {
        BwDirection::In => RuleType::BandwidthIn,
        BwDirection::Out => RuleType::BandwidthOut,
    }
}

/// Group uuid embedded in a per-VM rule id (`adjust-cpu-<domain>-<uuid>`).
fn group_uuid_from_rule_id<'a>(rule_id: &'a str, domain: &str) -> Option<&'a str> {
    [RuleType::Cpu, RuleType::BandwidthIn]
        .iter()
        .find_map(|t| rule_id.strip_prefix(t.rule_id_prefix()))
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|rest| rest.strip_prefix(domain))
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|uuid| !uuid.is_empty())
}
