pub mod ingest_service;
pub mod models;

pub use ingest_service::{AlertOutcome, AlertResult, BatchOutcome, WebhookIngestor};
pub use models::{AlertWebhookRequest, WebhookAlert};
