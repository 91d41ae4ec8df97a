use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::db::services::LinkKey;
use crate::rules::files::write_atomic;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManifestLabels {
    pub domain: String,
    pub rule_id: String,
    pub instance_id: String,
    #[serde(default)]
    pub target_device: String,
}

/// One matched VM (or VM interface) in file service-discovery format.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub targets: Vec<String>,
    pub labels: ManifestLabels,
}

impl ManifestEntry {
    fn group_uuid_matches(&self, group_uuid: &str) -> bool {
        self.labels
            .rule_id
            .strip_suffix(group_uuid)
            .is_some_and(|prefix| prefix.ends_with('-'))
    }

    fn key(&self) -> LinkKey {
        LinkKey::new(self.labels.instance_id.clone(), self.labels.target_device.clone())
    }
}

/// The `matched_vms.json` file shared by every rule group. All writers go
/// through one lock; the file is replaced atomically.
pub struct ManifestStore {
    path: PathBuf,
    scrape_target: String,
    lock: Mutex<()>,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>, scrape_target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            scrape_target: scrape_target.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry(&self, domain: &str, rule_id: &str, instance_id: &str, target_device: &str) -> ManifestEntry {
        ManifestEntry {
            targets: vec![self.scrape_target.clone()],
            labels: ManifestLabels {
                domain: domain.to_string(),
                rule_id: rule_id.to_string(),
                instance_id: instance_id.to_string(),
                target_device: target_device.to_string(),
            },
        }
    }

    pub fn load(&self) -> Result<Vec<ManifestEntry>, ManifestError> {
        read_entries(&self.path)
    }

    /// Adds entries, replacing any entry with the same rule id and device.
    pub async fn upsert(&self, entries: Vec<ManifestEntry>) -> Result<bool, ManifestError> {
        if entries.is_empty() {
            return Ok(false);
        }
        let _guard = self.lock.lock().await;
        let mut current = read_entries(&self.path)?;
        current.retain(|existing| {
            !entries.iter().any(|new| {
                new.labels.rule_id == existing.labels.rule_id
                    && new.labels.target_device == existing.labels.target_device
            })
        });
        current.extend(entries);
        self.persist(current)
    }

    /// Drops the entries of a group matching `keys`.
    pub async fn remove_links(&self, group_uuid: &str, keys: &[LinkKey]) -> Result<bool, ManifestError> {
        if keys.is_empty() {
            return Ok(false);
        }
        let _guard = self.lock.lock().await;
        let mut current = read_entries(&self.path)?;
        let before = current.len();
        current.retain(|e| !(e.group_uuid_matches(group_uuid) && keys.contains(&e.key())));
        if current.len() == before {
            return Ok(false);
        }
        self.persist(current)
    }

    /// Drops every entry of a group.
    pub async fn remove_group(&self, group_uuid: &str) -> Result<bool, ManifestError> {
        let _guard = self.lock.lock().await;
        let mut current = read_entries(&self.path)?;
        let before = current.len();
        current.retain(|e| !e.group_uuid_matches(group_uuid));
        if current.len() == before {
            return Ok(false);
        }
        self.persist(current)
    }

    fn persist(&self, mut entries: Vec<ManifestEntry>) -> Result<bool, ManifestError> {
        entries.sort();
        entries.dedup();
        let body = serde_json::to_vec_pretty(&entries)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|source| ManifestError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let changed = write_atomic(&self.path, &body).map_err(|source| ManifestError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), entries = entries.len(), changed, "Manifest written.");
        Ok(changed)
    }
}

fn read_entries(path: &Path) -> Result<Vec<ManifestEntry>, ManifestError> {
    match fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(ManifestError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
