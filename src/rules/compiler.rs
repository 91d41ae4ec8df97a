use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::entities::adjust_rule_group;
use crate::monitoring::PrometheusClient;
use crate::rules::files::{RuleFileManager, RuleFilePaths};
use crate::rules::render::{RuleRenderer, RuleTarget};
use crate::rules::{RuleError, ValidatedRule};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutcome {
    /// Any rule file or activation symlink changed on disk.
    pub changed: bool,
    pub reloaded: bool,
    pub has_special: bool,
}

/// Renders rule groups to disk, keeps activation symlinks in line with the
/// `enabled` flag and asks Prometheus to reload after every change.
pub struct RuleCompiler {
    renderer: RuleRenderer,
    files: RuleFileManager,
    prometheus: Arc<PrometheusClient>,
}

impl RuleCompiler {
    pub fn new(files: RuleFileManager, prometheus: Arc<PrometheusClient>) -> Result<Self, RuleError> {
        files.ensure_dirs()?;
        Ok(Self {
            renderer: RuleRenderer::new()?,
            files,
            prometheus,
        })
    }

    pub fn paths(&self, group: &adjust_rule_group::Model) -> RuleFilePaths {
        self.files.paths(group)
    }

    pub async fn apply(
        &self,
        group: &adjust_rule_group::Model,
        rule: &ValidatedRule,
        targets: &BTreeSet<RuleTarget>,
    ) -> Result<CompileOutcome, RuleError> {
        let rendered = self.renderer.render(group, rule, targets)?;
        let paths = self.files.paths(group);

        let mut changed = self.files.write(&paths.general, &rendered.general)?;
        let has_special = match &rendered.special {
            Some(special) => {
                changed |= self.files.write(&paths.special, special)?;
                true
            }
            None => {
                changed |= self.files.remove(&paths.special_link)?;
                changed |= self.files.remove(&paths.special)?;
                false
            }
        };

        if group.enabled {
            changed |= self.files.activate(&paths.general, &paths.general_link)?;
            if has_special {
                changed |= self.files.activate(&paths.special, &paths.special_link)?;
            }
        } else {
            changed |= self.files.remove(&paths.general_link)?;
            changed |= self.files.remove(&paths.special_link)?;
        }

        let reloaded = if changed {
            info!(
                group_uuid = %group.uuid,
                rule_type = %group.rule_type,
                linked = targets.len(),
                enabled = group.enabled,
                "Rule files updated."
            );
            self.reload().await
        } else {
            debug!(group_uuid = %group.uuid, "Rule files unchanged; skipping reload.");
            false
        };

        Ok(CompileOutcome {
            changed,
            reloaded,
            has_special,
        })
    }

    /// Removes activation symlinks first, then the rule files they point to.
    /// Returns the paths that existed. Does not reload.
    pub fn remove_files(&self, group: &adjust_rule_group::Model) -> Result<Vec<PathBuf>, RuleError> {
        let paths = self.files.paths(group);
        let mut removed = Vec::new();
        for path in paths.all() {
            if self.files.remove(path)? {
                removed.push(path.clone());
            }
        }
        Ok(removed)
    }

    /// Requests a Prometheus reload. Failure is logged only: the files are
    /// already durable and the next reload picks them up.
    pub async fn reload(&self) -> bool {
        match self.prometheus.reload().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Prometheus reload failed; changes apply on the next reload.");
                false
            }
        }
    }
}
