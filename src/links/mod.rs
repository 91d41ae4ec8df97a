//! VM-to-rule associations and the scrape manifest derived from them.

pub mod manager;
pub mod manifest;

pub use manager::{GroupGuard, LinkManager, SyncDelta};
pub use manifest::{ManifestEntry, ManifestError, ManifestLabels, ManifestStore};
