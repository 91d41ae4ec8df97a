use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::enums::RuleType;

/// Every remediation the control loop knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    LimitCpu,
    RestoreCpu,
    LimitInBw,
    RestoreInBw,
    LimitOutBw,
    RestoreOutBw,
    /// Bandwidth config gauge is missing for an interface; notify only.
    ConfigMissing,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        ActionType::LimitCpu,
        ActionType::RestoreCpu,
        ActionType::LimitInBw,
        ActionType::RestoreInBw,
        ActionType::LimitOutBw,
        ActionType::RestoreOutBw,
        ActionType::ConfigMissing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::LimitCpu => "limit_cpu",
            ActionType::RestoreCpu => "restore_cpu",
            ActionType::LimitInBw => "limit_in_bw",
            ActionType::RestoreInBw => "restore_in_bw",
            ActionType::LimitOutBw => "limit_out_bw",
            ActionType::RestoreOutBw => "restore_out_bw",
            ActionType::ConfigMissing => "config_missing",
        }
    }

    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            ActionType::LimitCpu | ActionType::LimitInBw | ActionType::LimitOutBw
        )
    }

    /// Resource whose status gauge this action flips. `None` for notify-only actions.
    pub fn rule_type(&self) -> Option<RuleType> {
        match self {
            ActionType::LimitCpu | ActionType::RestoreCpu => Some(RuleType::Cpu),
            ActionType::LimitInBw | ActionType::RestoreInBw => Some(RuleType::BandwidthIn),
            ActionType::LimitOutBw | ActionType::RestoreOutBw => Some(RuleType::BandwidthOut),
            ActionType::ConfigMissing => None,
        }
    }

    pub fn limit_for(rule_type: RuleType) -> Self {
        match rule_type {
            RuleType::Cpu => ActionType::LimitCpu,
            RuleType::BandwidthIn => ActionType::LimitInBw,
            RuleType::BandwidthOut => ActionType::LimitOutBw,
        }
    }

    pub fn restore_for(rule_type: RuleType) -> Self {
        match rule_type {
            RuleType::Cpu => ActionType::RestoreCpu,
            RuleType::BandwidthIn => ActionType::RestoreInBw,
            RuleType::BandwidthOut => ActionType::RestoreOutBw,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unknown action type: {s}"))
    }
}
