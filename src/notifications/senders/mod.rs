use async_trait::async_trait;
use thiserror::Error;

use super::models::NotifyPayload;

pub mod webhook;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Delivers an adjustment outcome to a callback.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, url: &str, payload: &NotifyPayload) -> Result<(), SenderError>;
}
