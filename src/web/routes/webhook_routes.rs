use axum::{Json, Router, body::Bytes, extract::State, routing::post};
use std::sync::Arc;
use tracing::{info, warn};

use crate::alerting::AlertWebhookRequest;
use crate::web::models::WebhookResponse;
use crate::web::{AppState, error::AppError};

pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::<Arc<AppState>>::new().route("/webhook", post(receive_alerts))
}

/// Answers 200 with a per-alert summary whenever the payload parses.
#[axum::debug_handler]
async fn receive_alerts(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let request: AlertWebhookRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Rejected malformed alert webhook payload.");
        AppError::from(e)
    })?;

    info!(
        group_status = %request.status,
        alerts = request.alerts.len(),
        "Received alert webhook."
    );
    let batch = app_state.ingestor.process_batch(&request.alerts).await;

    Ok(Json(WebhookResponse {
        status: "success".to_string(),
        total_alerts: batch.total,
        success_count: batch.succeeded,
        failed_count: batch.failed,
        skipped_count: batch.skipped,
        message: "Resource adjustment processing completed".to_string(),
        processed_at: batch.processed_at.to_rfc3339(),
        results: batch.results,
    }))
}
