use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::MonitoringError;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Sample>,
}

/// One element of an instant-vector result.
#[derive(Debug, Clone, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    pub value: (f64, String),
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.metric.get(name).map(String::as_str)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.1.parse().ok()
    }
}

/// Thin HTTP client over the Prometheus query and lifecycle APIs.
pub struct PrometheusClient {
    client: Client,
    base_url: String,
    query_timeout: Duration,
    reload_timeout: Duration,
}

impl PrometheusClient {
    pub fn new(
        base_url: impl Into<String>,
        query_timeout: Duration,
        reload_timeout: Duration,
    ) -> Result<Self, MonitoringError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            query_timeout,
            reload_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Runs an instant query and returns its vector result.
    pub async fn instant_query(&self, expr: &str) -> Result<Vec<Sample>, MonitoringError> {
        let url = format!("{}/api/v1/query", self.base_url);
        debug!(query = %expr, "Querying Prometheus.");
        let response = self
            .client
            .get(&url)
            .query(&[("query", expr)])
            .timeout(self.query_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitoringError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QueryResponse = response.json().await?;
        if parsed.status != "success" {
            return Err(MonitoringError::Unsuccessful(
                parsed.error.unwrap_or(parsed.status),
            ));
        }
        Ok(parsed.data.map(|d| d.result).unwrap_or_default())
    }

    /// Asks Prometheus to re-read its configuration and rule files.
    pub async fn reload(&self) -> Result<(), MonitoringError> {
        let url = format!("{}/-/reload", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.reload_timeout)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {
                info!("Prometheus configuration reloaded.");
                Ok(())
            }
            StatusCode::FORBIDDEN => Err(MonitoringError::LifecycleDisabled),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(MonitoringError::UnexpectedStatus {
                    status: s.as_u16(),
                    body,
                })
            }
        }
    }
}
