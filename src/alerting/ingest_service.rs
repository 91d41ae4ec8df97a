use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerting::models::WebhookAlert;
use crate::monitoring::{StatusOracle, StatusQuery};
use crate::notifications::NotificationService;
use crate::remediation::{ActionType, AdjustmentRequest, RemediationExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOutcome {
    /// Missing or unknown labels. Nothing was attempted.
    Rejected,
    /// The resource is already limited. Nothing was attempted.
    Deduplicated,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertResult {
    pub index: usize,
    pub domain: String,
    pub action_type: String,
    pub outcome: AlertOutcome,
    pub details: String,
    pub notified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub processed_at: DateTime<Utc>,
    pub results: Vec<AlertResult>,
}

struct ValidatedAlert<'a> {
    alert: &'a WebhookAlert,
    action: ActionType,
    domain: &'a str,
    rule_id: &'a str,
}

/// Entry point for monitoring alerts: validate, deduplicate, remediate,
/// then notify.
pub struct WebhookIngestor {
    oracle: Arc<StatusOracle>,
    executor: Arc<RemediationExecutor>,
    notifier: Arc<NotificationService>,
}

impl WebhookIngestor {
    pub fn new(
        oracle: Arc<StatusOracle>,
        executor: Arc<RemediationExecutor>,
        notifier: Arc<NotificationService>,
    ) -> Self {
        Self {
            oracle,
            executor,
            notifier,
        }
    }

    /// Alerts are processed independently of each other.
    pub async fn process_batch(&self, alerts: &[WebhookAlert]) -> BatchOutcome {
        let batch_id = Uuid::new_v4();
        info!(batch_id = %batch_id, total = alerts.len(), "Processing alert batch.");

        let results: Vec<AlertResult> = join_all(
            alerts
                .iter()
                .enumerate()
                .map(|(index, alert)| self.process_alert(index, alert)),
        )
        .await;

        let count = |o: AlertOutcome| results.iter().filter(|r| r.outcome == o).count();
        let outcome = BatchOutcome {
            total: alerts.len(),
            succeeded: count(AlertOutcome::Succeeded),
            failed: count(AlertOutcome::Failed) + count(AlertOutcome::Rejected),
            skipped: count(AlertOutcome::Deduplicated),
            processed_at: Utc::now(),
            results,
        };
        info!(
            batch_id = %batch_id,
            total = outcome.total,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "Alert batch processed."
        );
        outcome
    }

    pub async fn process_alert(&self, index: usize, alert: &WebhookAlert) -> AlertResult {
        let result = |outcome, details: String, notified| AlertResult {
            index,
            domain: alert.label("domain").to_string(),
            action_type: alert.label("action_type").to_string(),
            outcome,
            details,
            notified,
        };

        let validated = match validate(alert) {
            Ok(v) => v,
            Err(reason) => {
                warn!(index, reason = %reason, "Rejected alert.");
                return result(AlertOutcome::Rejected, reason, false);
            }
        };

        if alert.is_firing() && validated.action.is_limit() && self.already_limited(&validated).await {
            info!(
                domain = %validated.domain,
                rule_id = %validated.rule_id,
                action = %validated.action,
                "Resource already limited; skipping."
            );
            return result(AlertOutcome::Deduplicated, "already limited".to_string(), false);
        }

        let request = AdjustmentRequest {
            action: validated.action,
            domain: validated.domain.to_string(),
            status_rule_id: validated.rule_id.to_string(),
            group_uuid: alert.label("rule_group").to_string(),
            global_rule_id: alert.label("global_rule_id").to_string(),
            target_device: alert.label("target_device").to_string(),
            instance_id: alert.label("instance_id").to_string(),
        };
        let dispatched = self.executor.execute(&request).await;

        let notified = self
            .notifier
            .notify_outcome(validated.alert, dispatched.success)
            .await
            .unwrap_or(false);

        let outcome = if dispatched.success {
            AlertOutcome::Succeeded
        } else {
            AlertOutcome::Failed
        };
        result(outcome, dispatched.details, notified)
    }

    async fn already_limited(&self, alert: &ValidatedAlert<'_>) -> bool {
        let Some(rule_type) = alert.action.rule_type() else {
            return false;
        };
        let device = alert.alert.label("target_device");
        let query = StatusQuery {
            domain: alert.domain,
            rule_id: alert.rule_id,
            rule_type,
            device: Some(device).filter(|d| !d.is_empty()),
        };
        let state = self.oracle.status(&query).await;
        debug!(domain = %alert.domain, rule_id = %alert.rule_id, state = ?state, "Adjustment state checked.");
        state.blocks_repeat_limit()
    }
}

fn validate(alert: &WebhookAlert) -> Result<ValidatedAlert<'_>, String> {
    let domain = alert.label("domain");
    let rule_id = alert.label("rule_id");
    let action_type = alert.label("action_type");
    if domain.is_empty() || rule_id.is_empty() || action_type.is_empty() {
        return Err(format!(
            "missing required labels: domain='{domain}', rule_id='{rule_id}', action_type='{action_type}'"
        ));
    }
    let action = action_type.parse::<ActionType>()?;
    Ok(ValidatedAlert {
        alert,
        action,
        domain,
        rule_id,
    })
}
