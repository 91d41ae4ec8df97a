use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::enums::RuleType;
use crate::monitoring::{MonitoringError, PrometheusClient, TargetCache};

/// Remediation state of one (domain, rule, resource) tuple as reported by
/// the status gauges published on the hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentState {
    Limited,
    NotLimited,
    QueryFailed,
}

impl AdjustmentState {
    /// Deduplication before acting: an unknown state never suppresses a limit.
    pub fn blocks_repeat_limit(self) -> bool {
        matches!(self, AdjustmentState::Limited)
    }

    /// Restore decisions during reconciliation. `None` means the state is
    /// unknown and the restore must be skipped.
    pub fn needs_restore(self) -> Option<bool> {
        match self {
            AdjustmentState::Limited => Some(true),
            AdjustmentState::NotLimited => Some(false),
            AdjustmentState::QueryFailed => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusQuery<'a> {
    pub domain: &'a str,
    /// Per-VM rule id, e.g. `adjust-cpu-inst-5-<group uuid>`.
    pub rule_id: &'a str,
    pub rule_type: RuleType,
    pub device: Option<&'a str>,
}

impl StatusQuery<'_> {
    pub fn expr(&self) -> String {
        match self.rule_type.direction() {
            None => format!(
                r#"vm_cpu_adjustment_status{{domain="{}",rule_id="{}"}}"#,
                self.domain, self.rule_id
            ),
            Some(direction) => {
                let mut expr = format!(
                    r#"vm_bandwidth_adjustment_status{{domain="{}",rule_id="{}",type="{}""#,
                    self.domain, self.rule_id, direction
                );
                if let Some(device) = self.device.filter(|d| !d.is_empty()) {
                    expr.push_str(&format!(r#",target_device="{device}""#));
                }
                expr.push('}');
                expr
            }
        }
    }
}

pub struct StatusOracle {
    prometheus: Arc<PrometheusClient>,
    targets: Option<Arc<TargetCache>>,
}

impl StatusOracle {
    pub fn new(prometheus: Arc<PrometheusClient>) -> Self {
        Self {
            prometheus,
            targets: None,
        }
    }

    pub fn with_target_cache(mut self, cache: Arc<TargetCache>) -> Self {
        self.targets = Some(cache);
        self
    }

    pub async fn status(&self, query: &StatusQuery<'_>) -> AdjustmentState {
        if let Some(cache) = &self.targets {
            if cache.contains(query.domain).await == Some(false) {
                debug!(domain = %query.domain, "Domain is not a monitoring target; treating as not limited.");
                return AdjustmentState::NotLimited;
            }
        }

        let expr = query.expr();
        match self.prometheus.instant_query(&expr).await {
            Ok(samples) => match samples.first() {
                Some(sample) if sample.value.1 == "1" => AdjustmentState::Limited,
                _ => AdjustmentState::NotLimited,
            },
            // Prometheus answered but the query itself did not succeed: no gauge to read.
            Err(MonitoringError::Unsuccessful(reason)) => {
                debug!(query = %expr, reason = %reason, "Status query unsuccessful; treating as not limited.");
                AdjustmentState::NotLimited
            }
            Err(e) => {
                warn!(
                    domain = %query.domain,
                    rule_id = %query.rule_id,
                    rule_type = %query.rule_type,
                    error = %e,
                    "Status query failed."
                );
                AdjustmentState::QueryFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;

    fn oracle(url: &str) -> StatusOracle {
        StatusOracle::new(Arc::new(
            PrometheusClient::new(url, Duration::from_secs(2), Duration::from_secs(2)).unwrap(),
        ))
    }

    fn cpu_query() -> StatusQuery<'static> {
        StatusQuery {
            domain: "inst-5",
            rule_id: "adjust-cpu-inst-5-g1",
            rule_type: RuleType::Cpu,
            device: None,
        }
    }

    #[test]
    fn test_expr_templates() {
        assert_eq!(
            cpu_query().expr(),
            r#"vm_cpu_adjustment_status{domain="inst-5",rule_id="adjust-cpu-inst-5-g1"}"#
        );
        let bw = StatusQuery {
            domain: "inst-5",
            rule_id: "adjust-bw-inst-5-g2",
            rule_type: RuleType::BandwidthOut,
            device: Some("tap0a0b0c"),
        };
        assert_eq!(
            bw.expr(),
            r#"vm_bandwidth_adjustment_status{domain="inst-5",rule_id="adjust-bw-inst-5-g2",type="out",target_device="tap0a0b0c"}"#
        );
    }

    #[test]
    fn test_degradation_policies_are_asymmetric() {
        assert!(!AdjustmentState::QueryFailed.blocks_repeat_limit());
        assert_eq!(AdjustmentState::QueryFailed.needs_restore(), None);
        assert!(AdjustmentState::Limited.blocks_repeat_limit());
        assert_eq!(AdjustmentState::Limited.needs_restore(), Some(true));
        assert_eq!(AdjustmentState::NotLimited.needs_restore(), Some(false));
    }

    #[tokio::test]
    async fn test_gauge_values_map_to_states() {
        let mut server = mockito::Server::new_async().await;
        let _limited = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Regex("inst-5".into()))
            .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1.0,"1"]}]}}"#)
            .create_async()
            .await;
        let _empty = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Regex("inst-6".into()))
            .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
            .create_async()
            .await;
        let _broken = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Regex("inst-7".into()))
            .with_status(500)
            .create_async()
            .await;

        let oracle = oracle(&server.url());
        assert_eq!(oracle.status(&cpu_query()).await, AdjustmentState::Limited);

        let mut q = cpu_query();
        q.domain = "inst-6";
        assert_eq!(oracle.status(&q).await, AdjustmentState::NotLimited);

        q.domain = "inst-7";
        assert_eq!(oracle.status(&q).await, AdjustmentState::QueryFailed);
    }

    #[tokio::test]
    async fn test_unreachable_prometheus_is_query_failed() {
        let oracle = oracle("http://127.0.0.1:9");
        assert_eq!(oracle.status(&cpu_query()).await, AdjustmentState::QueryFailed);
    }
}
