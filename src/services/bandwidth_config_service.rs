use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::db::services::InstanceDirectory;
use crate::error::AdjustResult;
use crate::remediation::commands;
use crate::server::command_dispatcher::{CommandDispatcher, FanOutReport};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthRegenerateOutcome {
    pub interfaces: usize,
    /// Interfaces without a derivable tap device or with unquotable values.
    pub skipped: usize,
    pub hosts: FanOutReport,
}

/// Republishes the configured interface bandwidth gauges on hypervisors.
#[derive(Clone)]
pub struct BandwidthConfigService {
    instances: InstanceDirectory,
    dispatcher: CommandDispatcher,
}

impl BandwidthConfigService {
    pub fn new(instances: InstanceDirectory, dispatcher: CommandDispatcher) -> Self {
        Self { instances, dispatcher }
    }

    /// One chained command per host covering all of its active interfaces.
    pub async fn regenerate(&self, hyper_id: Option<i32>) -> AdjustResult<BandwidthRegenerateOutcome> {
        let mut per_host: BTreeMap<i32, Vec<String>> = BTreeMap::new();
        let mut interfaces = 0;
        let mut skipped = 0;

        for (vm, iface) in self.instances.active_interfaces(hyper_id).await? {
            let Some(device) = iface.target_device() else {
                debug!(domain = %vm.domain, mac = %iface.mac_addr, "Interface has no tap device; skipped.");
                skipped += 1;
                continue;
            };
            match commands::interface_bandwidth_metric(&vm.domain, &device, iface.inbound, iface.outbound) {
                Ok(command) => {
                    per_host.entry(vm.hyper_id).or_default().push(command);
                    interfaces += 1;
                }
                Err(e) => {
                    warn!(domain = %vm.domain, device = %device, error = %e, "Interface skipped.");
                    skipped += 1;
                }
            }
        }

        let hosts: BTreeSet<i32> = per_host.keys().copied().collect();
        let report = self
            .dispatcher
            .fan_out(&hosts, |id| {
                per_host.get(&id).map(|cmds| cmds.join(" && ")).unwrap_or_default()
            })
            .await;

        info!(
            interfaces,
            skipped,
            hosts = hosts.len(),
            failed_hosts = report.failed.len(),
            "Interface bandwidth metrics regenerated."
        );
        Ok(BandwidthRegenerateOutcome {
            interfaces,
            skipped,
            hosts: report,
        })
    }
}
