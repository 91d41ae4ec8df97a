//! Limit and restore actions dispatched to the hypervisor owning a VM.

pub mod action;
pub mod commands;
pub mod executor;

pub use action::ActionType;
pub use executor::{AdjustmentRequest, DispatchOutcome, RemediationExecutor};
