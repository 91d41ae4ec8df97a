use thiserror::Error;

use crate::links::manifest::ManifestError;
use crate::monitoring::MonitoringError;
use crate::remediation::commands::CommandError;
use crate::rules::RuleError;
use crate::server::command_dispatcher::DispatcherError;

/// Errors surfaced by the adjustment control loop to its callers.
///
/// Partial failures of multi-step operations are not errors: they are
/// collected as warnings on the returned outcome.
#[derive(Error, Debug)]
pub enum AdjustError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Data inconsistency: {0}")]
    Integrity(String),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Rule file error: {0}")]
    Rules(#[from] RuleError),
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("Monitoring error: {0}")]
    Monitoring(#[from] MonitoringError),
    #[error("Host command error: {0}")]
    Command(#[from] CommandError),
    #[error("Command dispatch error: {0}")]
    Dispatch(#[from] DispatcherError),
}

pub type AdjustResult<T> = Result<T, AdjustError>;
