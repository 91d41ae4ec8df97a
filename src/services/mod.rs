//! Orchestration over the rule store, link manager, compiler and executor.

pub mod adjust_rule_service;
pub mod bandwidth_config_service;
pub mod reconcile_service;

pub use adjust_rule_service::{AdjustRuleService, RegenerateOutcome};
pub use bandwidth_config_service::{BandwidthConfigService, BandwidthRegenerateOutcome};
pub use reconcile_service::{DeleteOutcome, ReconcileService, RestoreStep, UnlinkOutcome};
