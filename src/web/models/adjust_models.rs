use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::entities::{adjust_rule_group, adjustment_history, vm_rule_link};
use crate::db::enums::RuleType;
use crate::db::services::LinkKey;
use crate::rules::{Thresholds, ThresholdsPatch};

/// A VM to link, with the interface for bandwidth groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedVmRequest {
    pub vm_uuid: String,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleGroupRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub owner: String,
    #[serde(default)]
    pub region_id: String,
    pub rule_id: String,
    #[serde(default)]
    pub notify_url: String,
    pub enabled: Option<bool>,
    pub rule: Thresholds,
    #[serde(default)]
    pub linked_vms: Vec<LinkedVmRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRuleGroupRequest {
    pub name: Option<String>,
    pub notify_url: Option<String>,
    pub rule: Option<ThresholdsPatch>,
    /// Full desired link set when present.
    pub linked_vms: Option<Vec<LinkedVmRequest>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// Query string of the list route; names follow the usual `page_size` style.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRuleGroupsQuery {
    #[serde(rename = "type")]
    pub rule_type: Option<RuleType>,
    pub owner: Option<String>,
    pub enabled: Option<bool>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegenerateBandwidthQuery {
    pub hyper_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroupResponse {
    pub id: i32,
    pub uuid: String,
    pub rule_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub owner: String,
    pub enabled: bool,
    pub region_id: String,
    pub notify_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<adjust_rule_group::Model> for RuleGroupResponse {
    fn from(model: adjust_rule_group::Model) -> Self {
        Self {
            id: model.id,
            uuid: model.uuid,
            rule_id: model.rule_id,
            name: model.name,
            rule_type: model.rule_type,
            owner: model.owner,
            enabled: model.enabled,
            region_id: model.region_id,
            notify_url: model.notify_url,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmLinkResponse {
    pub vm_uuid: String,
    pub device: String,
    pub created_at: DateTime<Utc>,
}

impl From<vm_rule_link::Model> for VmLinkResponse {
    fn from(model: vm_rule_link::Model) -> Self {
        Self {
            vm_uuid: model.vm_uuid,
            device: model.interface,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub id: i32,
    pub domain_name: String,
    pub rule_id: String,
    pub group_uuid: String,
    pub action_type: String,
    pub status: String,
    pub details: String,
    pub adjust_time: DateTime<Utc>,
}

impl From<adjustment_history::Model> for HistoryResponse {
    fn from(model: adjustment_history::Model) -> Self {
        Self {
            id: model.id,
            domain_name: model.domain_name,
            rule_id: model.rule_id,
            group_uuid: model.group_uuid,
            action_type: model.action_type,
            status: model.status.to_string(),
            details: model.details,
            adjust_time: model.adjust_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroupDetailResponse {
    pub group: RuleGroupResponse,
    pub rule: Thresholds,
    pub links: Vec<VmLinkResponse>,
    pub recent_history: Vec<HistoryResponse>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroupPageResponse {
    pub items: Vec<RuleGroupResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRuleGroupResponse {
    pub group: RuleGroupResponse,
    pub added: Vec<LinkKey>,
    pub removed: Vec<LinkKey>,
    pub links: Vec<VmLinkResponse>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkVmResponse {
    pub linked: bool,
    pub links: Vec<VmLinkResponse>,
}

/// Webhook ingestion summary. Field names follow the monitoring callback
/// contract, not the camelCase API.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub status: String,
    pub total_alerts: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub message: String,
    pub processed_at: String,
    pub results: Vec<crate::alerting::AlertResult>,
}
