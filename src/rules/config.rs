use serde::{Deserialize, Serialize};

use crate::db::entities::{bw_rule_detail, cpu_rule_detail};
use crate::db::enums::{BwDirection, RuleType};
use crate::error::AdjustError;

fn default_smooth_window() -> i32 {
    5
}

/// Numeric policy of a rule group. Thresholds are percentages: CPU usage for
/// CPU groups, share of the configured interface bandwidth for bandwidth groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub trigger_threshold: f64,
    pub recover_threshold: f64,
    /// Minutes.
    #[serde(default = "default_smooth_window")]
    pub smooth_window: i32,
    /// Seconds the trigger condition must hold before limiting.
    pub trigger_duration: i32,
    /// Seconds a limit is held before the recovery condition is evaluated.
    pub limit_duration: i32,
    pub limit_percent: i32,
}

/// Partial update of [`Thresholds`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdsPatch {
    pub trigger_threshold: Option<f64>,
    pub recover_threshold: Option<f64>,
    pub smooth_window: Option<i32>,
    pub trigger_duration: Option<i32>,
    pub limit_duration: Option<i32>,
    pub limit_percent: Option<i32>,
}

impl ThresholdsPatch {
    pub fn is_empty(&self) -> bool {
        self.trigger_threshold.is_none()
            && self.recover_threshold.is_none()
            && self.smooth_window.is_none()
            && self.trigger_duration.is_none()
            && self.limit_duration.is_none()
            && self.limit_percent.is_none()
    }

    pub fn apply(&self, mut base: Thresholds) -> Thresholds {
        if let Some(v) = self.trigger_threshold {
            base.trigger_threshold = v;
        }
        if let Some(v) = self.recover_threshold {
            base.recover_threshold = v;
        }
        if let Some(v) = self.smooth_window {
            base.smooth_window = v;
        }
        if let Some(v) = self.trigger_duration {
            base.trigger_duration = v;
        }
        if let Some(v) = self.limit_duration {
            base.limit_duration = v;
        }
        if let Some(v) = self.limit_percent {
            base.limit_percent = v;
        }
        base
    }
}

/// Rule definition for one kind of resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RuleConfig {
    Cpu(Thresholds),
    BandwidthIn(Thresholds),
    BandwidthOut(Thresholds),
}

impl RuleConfig {
    pub fn new(rule_type: RuleType, thresholds: Thresholds) -> Self {
        match rule_type {
            RuleType::Cpu => RuleConfig::Cpu(thresholds),
            RuleType::BandwidthIn => RuleConfig::BandwidthIn(thresholds),
            RuleType::BandwidthOut => RuleConfig::BandwidthOut(thresholds),
        }
    }

    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleConfig::Cpu(_) => RuleType::Cpu,
            RuleConfig::BandwidthIn(_) => RuleType::BandwidthIn,
            RuleConfig::BandwidthOut(_) => RuleType::BandwidthOut,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        match self {
            RuleConfig::Cpu(t) | RuleConfig::BandwidthIn(t) | RuleConfig::BandwidthOut(t) => t,
        }
    }

    pub fn from_cpu_detail(detail: &cpu_rule_detail::Model) -> Self {
        RuleConfig::Cpu(Thresholds {
            trigger_threshold: detail.trigger_threshold,
            recover_threshold: detail.recover_threshold,
            smooth_window: detail.smooth_window,
            trigger_duration: detail.trigger_duration,
            limit_duration: detail.limit_duration,
            limit_percent: detail.limit_percent,
        })
    }

    pub fn from_bw_detail(detail: &bw_rule_detail::Model) -> Self {
        let thresholds = Thresholds {
            trigger_threshold: detail.trigger_threshold_pct,
            recover_threshold: detail.recover_threshold_pct,
            smooth_window: detail.smooth_window,
            trigger_duration: detail.trigger_duration,
            limit_duration: detail.limit_duration,
            limit_percent: detail.limit_value_pct,
        };
        match detail.direction {
            BwDirection::In => RuleConfig::BandwidthIn(thresholds),
            BwDirection::Out => RuleConfig::BandwidthOut(thresholds),
        }
    }

    /// Checks the thresholds and seals the config for rendering.
    pub fn validate(self) -> Result<ValidatedRule, AdjustError> {
        let t = self.thresholds();
        if !(t.trigger_threshold > 0.0) || !(t.recover_threshold > 0.0) {
            return Err(AdjustError::Validation(
                "thresholds must be positive".to_string(),
            ));
        }
        if t.trigger_threshold <= t.recover_threshold {
            return Err(AdjustError::Validation(format!(
                "trigger threshold {} must be greater than recovery threshold {}",
                t.trigger_threshold, t.recover_threshold
            )));
        }
        if t.smooth_window <= 0 || t.trigger_duration <= 0 || t.limit_duration <= 0 {
            return Err(AdjustError::Validation(
                "smooth window and durations must be positive".to_string(),
            ));
        }
        if !(1..=100).contains(&t.limit_percent) {
            return Err(AdjustError::Validation(format!(
                "limit percent must be within 1..=100, got {}",
                t.limit_percent
            )));
        }
        if self.rule_type().is_bandwidth() && t.trigger_threshold > 100.0 {
            return Err(AdjustError::Validation(format!(
                "bandwidth trigger threshold must not exceed 100%, got {}",
                t.trigger_threshold
            )));
        }
        Ok(ValidatedRule(self))
    }
}

/// A [`RuleConfig`] that passed validation. Only these reach the renderer
/// and the rule store.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRule(RuleConfig);

impl ValidatedRule {
    pub fn config(&self) -> &RuleConfig {
        &self.0
    }

    pub fn rule_type(&self) -> RuleType {
        self.0.rule_type()
    }

    pub fn thresholds(&self) -> &Thresholds {
        self.0.thresholds()
    }
}
