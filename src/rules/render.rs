use serde::Serialize;
use std::collections::BTreeSet;
use tera::{Context, Tera};

use crate::db::entities::adjust_rule_group;
use crate::db::enums::{BwDirection, RuleType};
use crate::remediation::action::ActionType;
use crate::rules::config::ValidatedRule;
use crate::rules::RuleError;

const RULE_FILE_TEMPLATE_NAME: &str = "rule_file.yml";

const RULE_FILE_TEMPLATE: &str = r#"# Managed by resource-adjust for rule group {{ group_uuid }}. Do not edit.
groups:
  - name: {{ group_name }}
    rules:
{%- for alert in alerts %}
      - alert: {{ alert.name }}
        expr: {{ alert.expr | json_encode() }}
        for: {{ alert.for_secs }}s
        labels:
{%- for label in alert.labels %}
          {{ label.key }}: {{ label.value | json_encode() }}
{%- endfor %}
        annotations:
          summary: {{ alert.summary | json_encode() }}
          description: {{ alert.description | json_encode() }}
{%- endfor %}
"#;

/// A VM (and, for bandwidth groups, one of its interfaces) covered by the
/// special rule. Ordering drives the rendered block order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleTarget {
    pub domain: String,
    pub device: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRules {
    pub general: String,
    /// `None` when the group has no linked VMs.
    pub special: Option<String>,
}

#[derive(Serialize)]
struct Label {
    key: &'static str,
    value: String,
}

#[derive(Serialize)]
struct AlertSpec {
    name: String,
    expr: String,
    for_secs: i32,
    labels: Vec<Label>,
    summary: String,
    description: String,
}

#[derive(Serialize)]
struct RuleFileContext<'a> {
    group_uuid: &'a str,
    group_name: String,
    alerts: Vec<AlertSpec>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scope {
    General,
    Special,
}

impl Scope {
    fn as_str(&self) -> &'static str {
        match self {
            Scope::General => "general",
            Scope::Special => "special",
        }
    }
}

/// Renders Prometheus rule files for a rule group.
pub struct RuleRenderer {
    tera: Tera,
}

impl RuleRenderer {
    pub fn new() -> Result<Self, RuleError> {
        let mut tera = Tera::default();
        tera.add_raw_template(RULE_FILE_TEMPLATE_NAME, RULE_FILE_TEMPLATE)?;
        Ok(Self { tera })
    }

    pub fn render(
        &self,
        group: &adjust_rule_group::Model,
        rule: &ValidatedRule,
        targets: &BTreeSet<RuleTarget>,
    ) -> Result<RenderedRules, RuleError> {
        let excluded: BTreeSet<&str> = targets.iter().map(|t| t.domain.as_str()).collect();
        let general_selector = general_selector(&excluded);

        let general_alerts = alerts_for(group, rule, Scope::General, &general_selector, None);
        let general = self.render_file(group, rule.rule_type(), Scope::General, general_alerts)?;

        let special = if targets.is_empty() {
            None
        } else {
            let mut alerts = Vec::new();
            for target in targets {
                let selector = special_selector(rule.rule_type(), target);
                alerts.extend(alerts_for(group, rule, Scope::Special, &selector, Some(target)));
            }
            Some(self.render_file(group, rule.rule_type(), Scope::Special, alerts)?)
        };

        Ok(RenderedRules { general, special })
    }

    fn render_file(
        &self,
        group: &adjust_rule_group::Model,
        rule_type: RuleType,
        scope: Scope,
        alerts: Vec<AlertSpec>,
    ) -> Result<String, RuleError> {
        let ctx = RuleFileContext {
            group_uuid: &group.uuid,
            group_name: format!(
                "adjust_{}_{}_{}",
                rule_type.file_tag().replace('-', "_"),
                scope.as_str(),
                group.uuid.replace('-', "_")
            ),
            alerts,
        };
        let context = Context::from_serialize(&ctx)?;
        Ok(self.tera.render(RULE_FILE_TEMPLATE_NAME, &context)?)
    }
}

/// Label matcher of the general rule: every domain except the linked ones.
pub fn general_selector(excluded: &BTreeSet<&str>) -> String {
    if excluded.is_empty() {
        return r#"domain=~".+""#.to_string();
    }
    let alternation = excluded
        .iter()
        .map(|d| regex::escape(d))
        .collect::<Vec<_>>()
        .join("|");
    format!("domain!~{}", promql_string(&alternation))
}

fn special_selector(rule_type: RuleType, target: &RuleTarget) -> String {
    if rule_type.is_bandwidth() {
        format!(
            "domain={},target_device={}",
            promql_string(&target.domain),
            promql_string(&target.device)
        )
    } else {
        format!("domain={}", promql_string(&target.domain))
    }
}

fn alerts_for(
    group: &adjust_rule_group::Model,
    rule: &ValidatedRule,
    scope: Scope,
    selector: &str,
    target: Option<&RuleTarget>,
) -> Vec<AlertSpec> {
    let rule_type = rule.rule_type();
    let t = rule.thresholds();
    let rule_id_template = format!("{}-$1-{}", rule_type.rule_id_prefix(), group.uuid);
    let with_rule_id =
        |expr: String| format!(r#"label_replace({expr}, "rule_id", "{rule_id_template}", "domain", "(.+)")"#);

    let mut alerts = Vec::new();
    match rule_type.direction() {
        None => {
            let usage = format!(
                "avg_over_time(vm_cpu_usage_percent{{{selector}}}[{}m])",
                t.smooth_window
            );
            alerts.push(AlertSpec {
                name: "CPUAdjustLimit".to_string(),
                expr: with_rule_id(format!("{usage} > {}", t.trigger_threshold)),
                for_secs: t.trigger_duration,
                labels: labels(group, scope, ActionType::LimitCpu, target),
                summary: "CPU usage of {{ $labels.domain }} above limit threshold".to_string(),
                description: format!(
                    "CPU usage {{{{ $value }}}}% stayed above {}% for {}s",
                    t.trigger_threshold, t.trigger_duration
                ),
            });
            alerts.push(AlertSpec {
                name: "CPUAdjustRestore".to_string(),
                expr: format!(
                    "{} and on(domain, rule_id) (vm_cpu_adjustment_status == 1)",
                    with_rule_id(format!("{usage} < {}", t.recover_threshold))
                ),
                for_secs: t.limit_duration,
                labels: labels(group, scope, ActionType::RestoreCpu, target),
                summary: "CPU usage of {{ $labels.domain }} recovered".to_string(),
                description: format!(
                    "CPU usage {{{{ $value }}}}% stayed below {}% for {}s",
                    t.recover_threshold, t.limit_duration
                ),
            });
        }
        Some(direction) => {
            let (title, counter) = match direction {
                BwDirection::In => ("Inbound", "libvirt_domain_interface_stats_receive_bytes_total"),
                BwDirection::Out => ("Outbound", "libvirt_domain_interface_stats_transmit_bytes_total"),
            };
            let dir = direction.as_str();
            let rate = format!("rate({counter}{{{selector}}}[{}m])", t.smooth_window);
            let configured = format!(r#"(vm_interface_bandwidth_config_mbps{{direction="{dir}"}} > 0)"#);
            let usage_pct = format!(
                "{rate} * 8 / 1000000 / on(domain, target_device) group_left() {configured} * 100"
            );
            alerts.push(AlertSpec {
                name: format!("{title}BandwidthAdjustLimit"),
                expr: with_rule_id(format!("{usage_pct} > {}", t.trigger_threshold)),
                for_secs: t.trigger_duration,
                labels: labels(group, scope, ActionType::limit_for(rule_type), target),
                summary: format!(
                    "{title} bandwidth of {{{{ $labels.domain }}}}/{{{{ $labels.target_device }}}} above limit threshold"
                ),
                description: format!(
                    "{title} usage {{{{ $value }}}}% of configured bandwidth stayed above {}% for {}s",
                    t.trigger_threshold, t.trigger_duration
                ),
            });
            alerts.push(AlertSpec {
                name: format!("{title}BandwidthAdjustRestore"),
                expr: format!(
                    r#"{} and on(domain, rule_id, target_device) (vm_bandwidth_adjustment_status{{type="{dir}"}} == 1)"#,
                    with_rule_id(format!("{usage_pct} < {}", t.recover_threshold))
                ),
                for_secs: t.limit_duration,
                labels: labels(group, scope, ActionType::restore_for(rule_type), target),
                summary: format!(
                    "{title} bandwidth of {{{{ $labels.domain }}}}/{{{{ $labels.target_device }}}} recovered"
                ),
                description: format!(
                    "{title} usage {{{{ $value }}}}% stayed below {}% for {}s",
                    t.recover_threshold, t.limit_duration
                ),
            });
            alerts.push(AlertSpec {
                name: format!("{title}BandwidthConfigMissing"),
                expr: with_rule_id(format!(
                    "{rate} > 0 unless on(domain, target_device) {configured}"
                )),
                for_secs: t.trigger_duration,
                labels: labels(group, scope, ActionType::ConfigMissing, target),
                summary: "Bandwidth config missing for {{ $labels.domain }}/{{ $labels.target_device }}"
                    .to_string(),
                description: format!(
                    "No {dir}bound bandwidth configuration is published for this interface; adjustment is not possible"
                ),
            });
        }
    }
    alerts
}

fn labels(
    group: &adjust_rule_group::Model,
    scope: Scope,
    action: ActionType,
    target: Option<&RuleTarget>,
) -> Vec<Label> {
    let mut labels = vec![
        Label { key: "severity", value: "warning".to_string() },
        Label { key: "alert_type", value: group.rule_type.as_str().to_string() },
        Label { key: "scope", value: scope.as_str().to_string() },
        Label { key: "action_type", value: action.as_str().to_string() },
        Label { key: "rule_group", value: group.uuid.clone() },
        Label { key: "global_rule_id", value: group.rule_id.clone() },
        Label { key: "owner", value: group.owner.clone() },
        Label { key: "region_id", value: group.region_id.clone() },
        Label { key: "notify_url", value: group.notify_url.clone() },
    ];
    if let Some(target) = target {
        labels.push(Label { key: "instance_id", value: target.instance_id.clone() });
    }
    labels
}

/// Double-quoted PromQL string literal. PromQL reads JSON string escapes.
fn promql_string(value: &str) -> String {
    serde_json::Value::String(value.to_owned()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::config::{RuleConfig, Thresholds};
    use chrono::Utc;

    fn group(rule_type: RuleType) -> adjust_rule_group::Model {
        let now = Utc::now();
        adjust_rule_group::Model {
            id: 1,
            uuid: "5f0c9a1e-0000-4000-8000-000000000001".to_string(),
            rule_id: "ext-rule-1".to_string(),
            name: "cpu guard".to_string(),
            rule_type,
            owner: "admin".to_string(),
            enabled: true,
            region_id: "region-a".to_string(),
            notify_url: "http://callback.local/notify".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn rule(rule_type: RuleType) -> ValidatedRule {
        RuleConfig::new(
            rule_type,
            Thresholds {
                trigger_threshold: 80.0,
                recover_threshold: 60.0,
                smooth_window: 5,
                trigger_duration: 60,
                limit_duration: 300,
                limit_percent: 50,
            },
        )
        .validate()
        .unwrap()
    }

    fn target(domain: &str, device: &str) -> RuleTarget {
        RuleTarget {
            domain: domain.to_string(),
            device: device.to_string(),
            instance_id: format!("uuid-{domain}"),
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = RuleRenderer::new().unwrap();
        let g = group(RuleType::Cpu);
        let r = rule(RuleType::Cpu);
        let a: BTreeSet<_> = [target("inst-9", ""), target("inst-2", "")].into();
        let b: BTreeSet<_> = [target("inst-2", ""), target("inst-9", "")].into();
        assert_eq!(renderer.render(&g, &r, &a).unwrap(), renderer.render(&g, &r, &b).unwrap());
    }

    #[test]
    fn test_linked_vms_are_excluded_from_general_and_scoped_in_special() {
        let renderer = RuleRenderer::new().unwrap();
        let targets: BTreeSet<_> = [target("inst-1", ""), target("inst-3", "")].into();
        let out = renderer.render(&group(RuleType::Cpu), &rule(RuleType::Cpu), &targets).unwrap();

        assert!(out.general.contains(r#"domain!~\"inst\\\\-1|inst\\\\-3\""#));
        let special = out.special.unwrap();
        assert!(special.contains(r#"domain=\"inst-1\""#));
        assert!(special.contains(r#"domain=\"inst-3\""#));
        assert!(!special.contains("inst-2"));
        assert!(!out.general.contains("inst-2"));
    }

    #[test]
    fn test_no_links_renders_only_general_rule() {
        let renderer = RuleRenderer::new().unwrap();
        let out = renderer
            .render(&group(RuleType::Cpu), &rule(RuleType::Cpu), &BTreeSet::new())
            .unwrap();
        assert!(out.special.is_none());
        assert!(out.general.contains(r#"domain=~\".+\""#));
        assert!(out.general.contains("alert: CPUAdjustLimit"));
        assert!(out.general.contains("for: 60s"));
        assert!(out.general.contains("action_type: \"limit_cpu\""));
        assert!(out.general.contains("action_type: \"restore_cpu\""));
    }

    #[test]
    fn test_bandwidth_special_rule_is_per_device() {
        let renderer = RuleRenderer::new().unwrap();
        let targets: BTreeSet<_> = [target("inst-4", "tap0a0b0c"), target("inst-4", "tap0d0e0f")].into();
        let out = renderer
            .render(&group(RuleType::BandwidthIn), &rule(RuleType::BandwidthIn), &targets)
            .unwrap();
        let special = out.special.unwrap();
        assert!(special.contains(r#"target_device=\"tap0a0b0c\""#));
        assert!(special.contains(r#"target_device=\"tap0d0e0f\""#));
        assert_eq!(special.matches("alert: InboundBandwidthAdjustLimit").count(), 2);
        assert!(out.general.contains("action_type: \"config_missing\""));
        assert!(out.general.contains("receive_bytes_total"));
        assert!(out.general.contains(r#"domain!~\"inst\\\\-4\""#));
    }

    #[test]
    fn test_domains_are_regex_quoted() {
        let excluded: BTreeSet<&str> = ["vm.a", "inst-7"].into();
        assert_eq!(general_selector(&excluded), r#"domain!~"inst\\-7|vm\\.a""#);
        let special = special_selector(
            RuleType::BandwidthIn,
            &RuleTarget {
                domain: "inst-7".to_string(),
                device: "tap\"x".to_string(),
                instance_id: "vm-7".to_string(),
            },
        );
        assert_eq!(special, r#"domain="inst-7",target_device="tap\"x""#);
    }
}
