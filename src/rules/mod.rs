//! Compilation of rule groups into Prometheus rule files.

pub mod compiler;
pub mod config;
pub mod files;
pub mod render;

use std::path::PathBuf;
use thiserror::Error;

pub use compiler::{CompileOutcome, RuleCompiler};
pub use config::{RuleConfig, Thresholds, ThresholdsPatch, ValidatedRule};
pub use render::{RenderedRules, RuleRenderer, RuleTarget};

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RuleError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> RuleError {
        let path = path.into();
        move |source| RuleError::Io { path, source }
    }
}
