use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::db::entities::adjust_rule_group;
use crate::rules::RuleError;

/// Replaces `path` with `contents` through a temp file and rename, so a reader
/// never sees a partial file. Returns `false` when the file already holds
/// exactly these bytes.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == contents {
            return Ok(false);
        }
    }
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), Permissions::from_mode(0o644))?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(true)
}

/// Removes a file or symlink. Returns `false` if nothing was there.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFilePaths {
    pub general: PathBuf,
    pub special: PathBuf,
    pub general_link: PathBuf,
    pub special_link: PathBuf,
}

impl RuleFilePaths {
    pub fn all(&self) -> [&PathBuf; 4] {
        [&self.general_link, &self.special_link, &self.general, &self.special]
    }
}

/// Owns the general/special rule directories and the enabled directory
/// holding activation symlinks.
#[derive(Debug, Clone)]
pub struct RuleFileManager {
    general_dir: PathBuf,
    special_dir: PathBuf,
    enabled_dir: PathBuf,
}

impl RuleFileManager {
    pub fn new(
        general_dir: impl Into<PathBuf>,
        special_dir: impl Into<PathBuf>,
        enabled_dir: impl Into<PathBuf>,
    ) -> Self {
        let absolute = |p: PathBuf| std::path::absolute(&p).unwrap_or(p);
        Self {
            general_dir: absolute(general_dir.into()),
            special_dir: absolute(special_dir.into()),
            enabled_dir: absolute(enabled_dir.into()),
        }
    }

    pub fn ensure_dirs(&self) -> Result<(), RuleError> {
        for dir in [&self.general_dir, &self.special_dir, &self.enabled_dir] {
            fs::create_dir_all(dir).map_err(RuleError::io(dir))?;
        }
        Ok(())
    }

    pub fn paths(&self, group: &adjust_rule_group::Model) -> RuleFilePaths {
        let tag = group.rule_type.file_tag();
        let owner = sanitize(&group.owner);
        let file = format!("adjust-{tag}-{owner}-{}.yml", group.uuid);
        RuleFilePaths {
            general: self.general_dir.join(&file),
            special: self.special_dir.join(&file),
            general_link: self
                .enabled_dir
                .join(format!("adjust-{tag}-general-{owner}-{}.yml", group.uuid)),
            special_link: self
                .enabled_dir
                .join(format!("adjust-{tag}-special-{owner}-{}.yml", group.uuid)),
        }
    }

    pub fn write(&self, path: &Path, contents: &str) -> Result<bool, RuleError> {
        write_atomic(path, contents.as_bytes()).map_err(RuleError::io(path))
    }

    /// Points `link` at `target`, replacing whatever was at `link` before.
    pub fn activate(&self, target: &Path, link: &Path) -> Result<bool, RuleError> {
        if let Ok(current) = fs::read_link(link) {
            if current == target {
                return Ok(false);
            }
        }
        remove_if_exists(link).map_err(RuleError::io(link))?;
        symlink(target, link).map_err(RuleError::io(link))?;
        Ok(true)
    }

    pub fn remove(&self, path: &Path) -> Result<bool, RuleError> {
        remove_if_exists(path).map_err(RuleError::io(path))
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
