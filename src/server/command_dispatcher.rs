use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("Host {0} is unreachable: {1}")]
    HostUnreachable(i32, String),
    #[error("Host {hyper_id} rejected the command with HTTP {status}: {body}")]
    Rejected {
        hyper_id: i32,
        status: u16,
        body: String,
    },
    #[error("Command to host {0} timed out")]
    Timeout(i32),
    #[error("Invalid host id: {0}")]
    InvalidHost(i32),
}

/// Transport that runs one shell command on one hypervisor host and reports
/// whether the host confirmed it.
#[async_trait]
pub trait HostCommandChannel: Send + Sync {
    async fn execute(&self, hyper_id: i32, command: &str) -> Result<(), DispatcherError>;
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    control: String,
    command: &'a str,
}

/// Sends commands through the HTTP command relay. Only a 2xx answer counts
/// as confirmation.
pub struct HttpCommandChannel {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpCommandChannel {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: endpoint.into(),
            timeout,
        })
    }
}

#[async_trait]
impl HostCommandChannel for HttpCommandChannel {
    async fn execute(&self, hyper_id: i32, command: &str) -> Result<(), DispatcherError> {
        if hyper_id < 0 {
            return Err(DispatcherError::InvalidHost(hyper_id));
        }
        let request = RelayRequest {
            control: format!("inter={hyper_id}"),
            command,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatcherError::Timeout(hyper_id)
                } else {
                    DispatcherError::HostUnreachable(hyper_id, e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DispatcherError::Rejected {
                hyper_id,
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Per-host results of a command sent to several hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutReport {
    pub succeeded: Vec<i32>,
    pub failed: Vec<(i32, String)>,
}

impl FanOutReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct CommandDispatcher {
    channel: Arc<dyn HostCommandChannel>,
}

impl CommandDispatcher {
    pub fn new(channel: Arc<dyn HostCommandChannel>) -> Self {
        Self { channel }
    }

    pub async fn dispatch(&self, hyper_id: i32, command: &str) -> Result<(), DispatcherError> {
        debug!(hyper_id, command = %command, "Dispatching host command.");
        let result = self.channel.execute(hyper_id, command).await;
        if let Err(e) = &result {
            warn!(hyper_id, command = %command, error = %e, "Host command failed.");
        }
        result
    }

    /// Runs one command per host concurrently. A failing host never stops
    /// the others.
    pub async fn fan_out<F>(&self, hosts: &BTreeSet<i32>, command_for: F) -> FanOutReport
    where
        F: Fn(i32) -> String,
    {
        let calls = hosts.iter().map(|&hyper_id| {
            let command = command_for(hyper_id);
            async move { (hyper_id, self.dispatch(hyper_id, &command).await) }
        });

        let mut report = FanOutReport::default();
        for (hyper_id, result) in join_all(calls).await {
            match result {
                Ok(()) => report.succeeded.push(hyper_id),
                Err(e) => report.failed.push((hyper_id, e.to_string())),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_http_channel_addresses_host() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/exec")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "control": "inter=3",
                "command": "echo hi"
            })))
            .with_status(200)
            .create_async()
            .await;

        let channel = HttpCommandChannel::new(format!("{}/exec", server.url()), Duration::from_secs(2)).unwrap();
        channel.execute(3, "echo hi").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_2xx_is_not_confirmation() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/exec")
            .with_status(500)
            .with_body("script failed")
            .create_async()
            .await;

        let channel = HttpCommandChannel::new(format!("{}/exec", server.url()), Duration::from_secs(2)).unwrap();
        let err = channel.execute(1, "false").await.unwrap_err();
        assert!(matches!(err, DispatcherError::Rejected { status: 500, .. }));
    }

    struct FlakyChannel;

    #[async_trait]
    impl HostCommandChannel for FlakyChannel {
        async fn execute(&self, hyper_id: i32, _command: &str) -> Result<(), DispatcherError> {
            if hyper_id % 2 == 0 {
                Err(DispatcherError::HostUnreachable(hyper_id, "down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_fan_out_collects_per_host_results() {
        let dispatcher = CommandDispatcher::new(Arc::new(FlakyChannel));
        let hosts: BTreeSet<i32> = [1, 2, 3, 4].into_iter().collect();
        let report = dispatcher.fan_out(&hosts, |h| format!("cleanup {h}")).await;
        assert_eq!(report.succeeded, vec![1, 3]);
        assert_eq!(report.failed.len(), 2);
        assert!(!report.all_succeeded());
    }
}
