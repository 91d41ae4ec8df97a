use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of resource a rule group governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum RuleType {
    #[sea_orm(string_value = "adjust_cpu")]
    #[serde(rename = "adjust_cpu")]
    Cpu,
    #[sea_orm(string_value = "adjust_in_bw")]
    #[serde(rename = "adjust_in_bw")]
    BandwidthIn,
    #[sea_orm(string_value = "adjust_out_bw")]
    #[serde(rename = "adjust_out_bw")]
    BandwidthOut,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Cpu => "adjust_cpu",
            RuleType::BandwidthIn => "adjust_in_bw",
            RuleType::BandwidthOut => "adjust_out_bw",
        }
    }

    pub fn is_bandwidth(&self) -> bool {
        !matches!(self, RuleType::Cpu)
    }

    pub fn direction(&self) -> Option<BwDirection> {
        match self {
            RuleType::Cpu => None,
            RuleType::BandwidthIn => Some(BwDirection::In),
            RuleType::BandwidthOut => Some(BwDirection::Out),
        }
    }

    /// Prefix of the per-VM rule id used by status gauges and the manifest.
    pub fn rule_id_prefix(&self) -> &'static str {
        match self {
            RuleType::Cpu => "adjust-cpu",
            RuleType::BandwidthIn | RuleType::BandwidthOut => "adjust-bw",
        }
    }

    /// Short name used in rule file names.
    pub fn file_tag(&self) -> &'static str {
        match self {
            RuleType::Cpu => "cpu",
            RuleType::BandwidthIn => "in-bw",
            RuleType::BandwidthOut => "out-bw",
        }
    }

    /// Value of the `--type` flag accepted by the host metric cleanup script.
    pub fn metrics_kind(&self) -> &'static str {
        match self {
            RuleType::Cpu => "cpu",
            RuleType::BandwidthIn | RuleType::BandwidthOut => "bandwidth",
        }
    }

    /// Rule id the status gauges carry for one VM of a group.
    pub fn status_rule_id(&self, domain: &str, group_uuid: &str) -> String {
        format!("{}-{}-{}", self.rule_id_prefix(), domain, group_uuid)
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adjust_cpu" | "cpu" => Ok(RuleType::Cpu),
            "adjust_in_bw" | "in_bw" => Ok(RuleType::BandwidthIn),
            "adjust_out_bw" | "out_bw" => Ok(RuleType::BandwidthOut),
            other => Err(format!("unknown rule type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum BwDirection {
    #[sea_orm(string_value = "in")]
    In,
    #[sea_orm(string_value = "out")]
    Out,
}

impl BwDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            BwDirection::In => "in",
            BwDirection::Out => "out",
        }
    }
}

impl fmt::Display for BwDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentStatus {
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl fmt::Display for AdjustmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdjustmentStatus::Processing => "processing",
            AdjustmentStatus::Completed => "completed",
            AdjustmentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}
