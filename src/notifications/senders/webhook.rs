use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{NotificationSender, SenderError};
use crate::notifications::models::NotifyPayload;

/// Posts the payload as JSON. Any status of 400 or above is a failure.
pub struct WebhookSender {
    client: Client,
    timeout: Duration,
}

impl WebhookSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, url: &str, payload: &NotifyPayload) -> Result<(), SenderError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();

        if status.as_u16() >= 400 {
            let error_body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Webhook returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}
