//! Data access for the adjustment tables and the instance tables.
//!
//! Each service wraps a shared `DatabaseConnection` and exposes the queries
//! one component needs.

pub mod adjustment_history_service;
pub mod instance_service;
pub mod rule_store_service;
pub mod vm_link_service;

pub use adjustment_history_service::{AdjustmentHistoryService, NewAdjustment};
pub use instance_service::{domain_for, parse_domain, InstanceDirectory, VmPlacement};
pub use rule_store_service::{NewRuleGroup, RuleGroupChanges, RuleGroupFilter, RuleStore};
pub use vm_link_service::{LinkKey, VmLinkService};
