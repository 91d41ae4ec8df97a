//! Read and control interfaces over the Prometheus server.

pub mod bandwidth;
pub mod prometheus;
pub mod status;
pub mod targets;

use thiserror::Error;

pub use bandwidth::InterfaceBandwidth;
pub use prometheus::{PrometheusClient, Sample};
pub use status::{AdjustmentState, StatusOracle, StatusQuery};
pub use targets::TargetCache;

#[derive(Error, Debug)]
pub enum MonitoringError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Prometheus returned HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("Prometheus lifecycle API is not enabled (start it with --web.enable-lifecycle)")]
    LifecycleDisabled,
    #[error("Query was not successful: {0}")]
    Unsuccessful(String),
}
