use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::monitoring::{MonitoringError, PrometheusClient};

const TARGETS_QUERY: &str = "group by (domain) (libvirt_domain_info_vstate)";

struct Snapshot {
    domains: HashSet<String>,
    fetched_at: Instant,
}

/// Short-lived cache of the domains Prometheus currently scrapes. Used to
/// skip status queries for VMs that cannot have a status gauge.
pub struct TargetCache {
    prometheus: Arc<PrometheusClient>,
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
}

impl TargetCache {
    pub fn new(prometheus: Arc<PrometheusClient>, ttl: Duration) -> Self {
        Self {
            prometheus,
            ttl,
            snapshot: RwLock::new(None),
        }
    }

    pub async fn refresh(&self) -> Result<usize, MonitoringError> {
        let samples = self.prometheus.instant_query(TARGETS_QUERY).await?;
        let domains: HashSet<String> = samples
            .iter()
            .filter_map(|s| s.label("domain").map(str::to_string))
            .collect();
        let count = domains.len();
        *self.snapshot.write().await = Some(Snapshot {
            domains,
            fetched_at: Instant::now(),
        });
        debug!(count, "Monitoring target cache refreshed.");
        Ok(count)
    }

    /// `None` when the target set is unknown. An empty target set is also
    /// reported as unknown so an exporter outage never hides a limit.
    pub async fn contains(&self, domain: &str) -> Option<bool> {
        let fresh = {
            let guard = self.snapshot.read().await;
            guard
                .as_ref()
                .is_some_and(|s| s.fetched_at.elapsed() < self.ttl)
        };
        if !fresh {
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "Failed to refresh monitoring target cache.");
                return None;
            }
        }

        let guard = self.snapshot.read().await;
        let snapshot = guard.as_ref()?;
        if snapshot.domains.is_empty() {
            return None;
        }
        Some(snapshot.domains.contains(domain))
    }

    pub async fn invalidate(&self) {
        *self.snapshot.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_contains_and_ttl() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Regex("libvirt_domain_info_vstate".into()))
            .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{"domain":"inst-1"},"value":[1.0,"1"]}]}}"#)
            .expect(2)
            .create_async()
            .await;

        let client = Arc::new(
            PrometheusClient::new(server.url(), Duration::from_secs(2), Duration::from_secs(2)).unwrap(),
        );
        let cache = TargetCache::new(client, Duration::from_secs(60));
        assert_eq!(cache.contains("inst-1").await, Some(true));
        assert_eq!(cache.contains("inst-2").await, Some(false));
        cache.invalidate().await;
        assert_eq!(cache.contains("inst-1").await, Some(true));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_prometheus_is_unknown() {
        let client = Arc::new(
            PrometheusClient::new("http://127.0.0.1:9", Duration::from_secs(1), Duration::from_secs(1)).unwrap(),
        );
        let cache = TargetCache::new(client, Duration::from_secs(60));
        assert_eq!(cache.contains("inst-1").await, None);
    }
}
