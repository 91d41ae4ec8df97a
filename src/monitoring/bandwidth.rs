use serde::Serialize;

use crate::db::enums::BwDirection;
use crate::monitoring::{MonitoringError, PrometheusClient};

/// Configured bandwidth of one VM interface, as published by the
/// `vm_interface_bandwidth_config_mbps` gauge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceBandwidth {
    pub inbound_mbps: f64,
    pub outbound_mbps: f64,
}

impl InterfaceBandwidth {
    pub fn total(&self, direction: BwDirection) -> f64 {
        match direction {
            BwDirection::In => self.inbound_mbps,
            BwDirection::Out => self.outbound_mbps,
        }
    }
}

impl PrometheusClient {
    /// Returns `None` when no gauge exists for the interface.
    pub async fn bandwidth_config(
        &self,
        domain: &str,
        device: &str,
    ) -> Result<Option<InterfaceBandwidth>, MonitoringError> {
        let expr = format!(
            r#"vm_interface_bandwidth_config_mbps{{domain="{domain}",target_device="{device}"}}"#
        );
        let samples = self.instant_query(&expr).await?;
        if samples.is_empty() {
            return Ok(None);
        }

        let mut config = InterfaceBandwidth::default();
        for sample in &samples {
            let Some(value) = sample.as_f64() else { continue };
            match sample.label("direction") {
                Some("in") => config.inbound_mbps = value,
                Some("out") => config.outbound_mbps = value,
                _ => {}
            }
        }
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bandwidth_config_splits_by_direction() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Regex("vm_interface_bandwidth_config_mbps".into()))
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[
                    {"metric":{"direction":"in","domain":"inst-3"},"value":[1.0,"100"]},
                    {"metric":{"direction":"out","domain":"inst-3"},"value":[1.0,"50"]}]}}"#,
            )
            .create_async()
            .await;

        let client =
            PrometheusClient::new(server.url(), Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        let config = client.bandwidth_config("inst-3", "tapaabbcc").await.unwrap().unwrap();
        assert_eq!(config.total(BwDirection::In), 100.0);
        assert_eq!(config.total(BwDirection::Out), 50.0);
    }

    #[tokio::test]
    async fn test_bandwidth_config_missing_gauge() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
            .create_async()
            .await;

        let client =
            PrometheusClient::new(server.url(), Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        assert!(client.bandwidth_config("inst-3", "tap000001").await.unwrap().is_none());
    }
}
