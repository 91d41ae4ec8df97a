//! SeaORM entities for the adjustment tables and the instance tables read
//! from the wider platform.

pub mod adjust_rule_group;
pub mod adjustment_history;
pub mod bw_rule_detail;
pub mod cpu_rule_detail;
pub mod instance;
pub mod instance_interface;
pub mod vm_rule_link;

pub mod prelude {
    pub use super::adjust_rule_group::ActiveModel as AdjustRuleGroupActiveModel;
    pub use super::adjust_rule_group::Column as AdjustRuleGroupColumn;
    pub use super::adjust_rule_group::Entity as AdjustRuleGroup;
    pub use super::adjust_rule_group::Model as AdjustRuleGroupModel;

    pub use super::cpu_rule_detail::ActiveModel as CpuRuleDetailActiveModel;
    pub use super::cpu_rule_detail::Column as CpuRuleDetailColumn;
    pub use super::cpu_rule_detail::Entity as CpuRuleDetail;
    pub use super::cpu_rule_detail::Model as CpuRuleDetailModel;

    pub use super::bw_rule_detail::ActiveModel as BwRuleDetailActiveModel;
    pub use super::bw_rule_detail::Column as BwRuleDetailColumn;
    pub use super::bw_rule_detail::Entity as BwRuleDetail;
    pub use super::bw_rule_detail::Model as BwRuleDetailModel;

    pub use super::vm_rule_link::ActiveModel as VmRuleLinkActiveModel;
    pub use super::vm_rule_link::Column as VmRuleLinkColumn;
    pub use super::vm_rule_link::Entity as VmRuleLink;
    pub use super::vm_rule_link::Model as VmRuleLinkModel;

    pub use super::adjustment_history::ActiveModel as AdjustmentHistoryActiveModel;
    pub use super::adjustment_history::Column as AdjustmentHistoryColumn;
    pub use super::adjustment_history::Entity as AdjustmentHistory;
    pub use super::adjustment_history::Model as AdjustmentHistoryModel;

    pub use super::instance::Entity as Instance;
    pub use super::instance::Model as InstanceModel;

    pub use super::instance_interface::Entity as InstanceInterface;
    pub use super::instance_interface::Model as InstanceInterfaceModel;
}
