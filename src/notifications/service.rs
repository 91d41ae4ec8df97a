use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{NotifyAlert, NotifyPayload};
use super::senders::{NotificationSender, SenderError};
use crate::alerting::models::WebhookAlert;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Sender error: {0}")]
    SenderError(#[from] SenderError),
}

/// Labels copied from the incoming alert into the notification.
const FORWARDED_LABELS: [&str; 8] = [
    "alertname",
    "severity",
    "domain",
    "action_type",
    "target_device",
    "instance_id",
    "alert_type",
    "region_id",
];

pub struct NotificationService {
    sender: Arc<dyn NotificationSender>,
}

impl NotificationService {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    pub fn build_payload(alert: &WebhookAlert, success: bool, now: DateTime<Utc>) -> NotifyPayload {
        let resolved = alert.is_resolved();
        let (prefix, ends_at) = if resolved {
            ("RESOLVED: Resource adjustment", Some(now))
        } else {
            ("Resource adjustment", alert.ends_at)
        };

        let mut labels: BTreeMap<String, String> = FORWARDED_LABELS
            .iter()
            .map(|key| (key.to_string(), alert.label(key).to_string()))
            .collect();
        labels.insert("rule_id".to_string(), alert.label("global_rule_id").to_string());
        labels.insert(
            "adjustment_status".to_string(),
            if success { "success" } else { "failed" }.to_string(),
        );

        let mut annotations = BTreeMap::new();
        annotations.insert(
            "summary".to_string(),
            format!(
                "{prefix} {}: {}",
                if success { "completed successfully" } else { "failed" },
                alert.annotation("summary")
            ),
        );
        annotations.insert("description".to_string(), alert.annotation("description").to_string());

        NotifyPayload {
            alerts: vec![NotifyAlert {
                state: alert.status.clone(),
                labels,
                annotations,
                starts_at: alert.starts_at,
                ends_at,
            }],
        }
    }

    /// Posts the outcome to the alert's `notify_url`. Returns `Ok(false)` when
    /// the alert carries no URL.
    pub async fn notify_outcome(&self, alert: &WebhookAlert, success: bool) -> Result<bool, NotificationError> {
        let url = alert.label("notify_url");
        if url.is_empty() {
            debug!(domain = %alert.label("domain"), "No notify_url on alert; skipping notification.");
            return Ok(false);
        }

        let payload = Self::build_payload(alert, success, Utc::now());
        match self.sender.send(url, &payload).await {
            Ok(()) => {
                info!(
                    domain = %alert.label("domain"),
                    action = %alert.label("action_type"),
                    success,
                    "Notification sent."
                );
                Ok(true)
            }
            Err(e) => {
                warn!(
                    domain = %alert.label("domain"),
                    rule_id = %alert.label("rule_id"),
                    action = %alert.label("action_type"),
                    url = %url,
                    error = %e,
                    "Failed to send notification."
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alert(status: &str) -> WebhookAlert {
        let labels = [
            ("alertname", "CPUAdjustLimit"),
            ("domain", "inst-5"),
            ("rule_id", "adjust-cpu-inst-5-g1"),
            ("global_rule_id", "ext-42"),
            ("action_type", "limit_cpu"),
            ("notify_url", "http://callback"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let annotations = [("summary".to_string(), "CPU high".to_string())].into_iter().collect();
        WebhookAlert {
            status: status.to_string(),
            labels,
            annotations,
            starts_at: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            ends_at: None,
        }
    }

    #[test]
    fn test_payload_for_firing_success() {
        let now = Utc::now();
        let payload = NotificationService::build_payload(&alert("firing"), true, now);
        let a = &payload.alerts[0];
        assert_eq!(a.state, "firing");
        assert_eq!(a.labels["rule_id"], "ext-42");
        assert_eq!(a.labels["adjustment_status"], "success");
        assert_eq!(a.labels["target_device"], "");
        assert_eq!(a.annotations["summary"], "Resource adjustment completed successfully: CPU high");
        assert_eq!(a.ends_at, None);
    }

    #[test]
    fn test_payload_for_resolved_failure() {
        let now = Utc::now();
        let payload = NotificationService::build_payload(&alert("resolved"), false, now);
        let a = &payload.alerts[0];
        assert_eq!(a.labels["adjustment_status"], "failed");
        assert_eq!(a.annotations["summary"], "RESOLVED: Resource adjustment failed: CPU high");
        assert_eq!(a.ends_at, Some(now));
    }

    #[test]
    fn test_payload_serializes_camel_case_times() {
        let payload = NotificationService::build_payload(&alert("firing"), true, Utc::now());
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["alerts"][0].get("startsAt").is_some());
        assert!(json["alerts"][0].get("endsAt").is_some());
    }
}
