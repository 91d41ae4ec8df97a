//! Host command lines understood by the hypervisor scripts.

use thiserror::Error;

use crate::db::enums::{BwDirection, RuleType};

const SCRIPT_DIR: &str = "/opt/cloudland/scripts/kvm";

#[derive(Error, Debug)]
#[error("Argument of {script} cannot be quoted for the host shell: {source}")]
pub struct CommandError {
    script: &'static str,
    #[source]
    source: shlex::QuoteError,
}

/// Joins the script path and its arguments into one shell-safe line.
fn command_line(script: &'static str, args: &[&str]) -> Result<String, CommandError> {
    let path = format!("{SCRIPT_DIR}/{script}");
    shlex::try_join(std::iter::once(path.as_str()).chain(args.iter().copied()))
        .map_err(|source| CommandError { script, source })
}

pub fn cpu_limit(domain: &str, limit_percent: i32) -> Result<String, CommandError> {
    command_line("adjust_cpu_hotplug.sh", &[domain, &limit_percent.to_string()])
}

pub fn cpu_restore(domain: &str) -> Result<String, CommandError> {
    command_line("adjust_cpu_hotplug.sh", &[domain, "restore"])
}

pub fn cpu_status(domain: &str, rule_id: &str, status: u8) -> Result<String, CommandError> {
    command_line(
        "update_vm_cpu_adjustment_status.sh",
        &["--domain", domain, "--rule-id", rule_id, "--status", &status.to_string()],
    )
}

/// Limits one direction of a NIC and leaves the other untouched.
pub fn nic_limit(vm_id: i32, nic: &str, direction: BwDirection, mbps: i64) -> Result<String, CommandError> {
    let (inbound, outbound, flag) = match direction {
        BwDirection::In => (mbps, 0, "--inbound-only"),
        BwDirection::Out => (0, mbps, "--outbound-only"),
    };
    command_line(
        "set_nic_speed.sh",
        &[&vm_id.to_string(), nic, &inbound.to_string(), &outbound.to_string(), flag],
    )
}

pub fn nic_restore(vm_id: i32, nic: &str, inbound: i32, outbound: i32) -> Result<String, CommandError> {
    command_line(
        "set_nic_speed.sh",
        &[&vm_id.to_string(), nic, &inbound.to_string(), &outbound.to_string()],
    )
}

pub fn bandwidth_status(
    domain: &str,
    rule_id: &str,
    direction: BwDirection,
    status: u8,
    device: &str,
) -> Result<String, CommandError> {
    command_line(
        "update_vm_bandwidth_adjustment_status.sh",
        &[
            "--domain",
            domain,
            "--rule-id",
            rule_id,
            "--type",
            direction.as_str(),
            "--status",
            &status.to_string(),
            "--target-device",
            device,
        ],
    )
}

/// Status gauge update for whichever resource `rule_type` governs.
pub fn status_update(
    rule_type: RuleType,
    domain: &str,
    rule_id: &str,
    device: &str,
    status: u8,
) -> Result<String, CommandError> {
    match rule_type.direction() {
        None => cpu_status(domain, rule_id, status),
        Some(direction) => bandwidth_status(domain, rule_id, direction, status, device),
    }
}

pub fn cleanup_rule_metrics(group_uuid: &str, rule_type: RuleType) -> Result<String, CommandError> {
    command_line(
        "cleanup_rule_metrics.sh",
        &["--rule-id", group_uuid, "--type", rule_type.metrics_kind()],
    )
}

pub fn interface_bandwidth_metric(
    domain: &str,
    device: &str,
    inbound: i32,
    outbound: i32,
) -> Result<String, CommandError> {
    command_line(
        "update_vm_interface_bandwidth.sh",
        &["add", domain, device, &inbound.to_string(), &outbound.to_string()],
    )
}
