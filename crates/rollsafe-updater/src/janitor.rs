use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rollsafe_core::{validate_identifier, ComponentManifest, COMPONENT_MANIFEST_FILE};

use crate::backup::{BackupManager, PruneReport};
use crate::fs_utils::{copy_dir_recursive, dir_is_non_empty, path_age_secs, remove_dir_if_exists};
use crate::workspace::WORKSPACE_PREFIX;
use crate::HostLayout;

/// Recovery and cleanup that runs outside (or after) a normal update.
#[derive(Debug, Clone)]
pub struct Janitor {
    layout: HostLayout,
}

impl Janitor {
    pub fn new(layout: HostLayout) -> Self {
        Self { layout }
    }

    /// Reinstate a component whose live directory went missing by copying
    /// the best leftover tree from the scratch or rollback roots. Returns
    /// whether anything was restored.
    pub fn rescue(&self, component_id: &str) -> Result<bool> {
        validate_identifier(component_id)?;
        let live_path = self.layout.component_path(component_id);

        let Some(source) = self.find_rescue_source(component_id) else {
            tracing::warn!(component = component_id, "no rescue candidate found");
            return Ok(false);
        };

        tracing::info!(component = component_id, source = %source.display(), "rescuing component");
        remove_dir_if_exists(&live_path)?;
        if let Err(err) = copy_dir_recursive(&source, &live_path) {
            let _ = remove_dir_if_exists(&live_path);
            return Err(err.context(format!(
                "failed to rescue '{component_id}' from {}",
                source.display()
            )));
        }
        Ok(true)
    }

    pub fn find_rescue_source(&self, component_id: &str) -> Option<PathBuf> {
        for root in [self.layout.scratch_dir(), self.layout.rollback_dir()] {
            if let Some(found) = find_in_root(&root, component_id) {
                return Some(found);
            }
        }
        None
    }

    /// Remove `attempt-*` workspaces older than `max_age_secs`, left
    /// behind by attempts that never reached their cleanup.
    pub fn sweep_workspaces(&self, max_age_secs: u64, now_unix: u64) -> Vec<PathBuf> {
        let scratch = self.layout.scratch_dir();
        let Ok(entries) = fs::read_dir(&scratch) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_name().to_string_lossy().starts_with(WORKSPACE_PREFIX) {
                continue;
            }
            let old_enough = path_age_secs(&path, now_unix)
                .map(|age| age >= max_age_secs)
                .unwrap_or(false);
            if !old_enough {
                continue;
            }
            match remove_dir_if_exists(&path) {
                Ok(()) => {
                    tracing::info!(workspace = %path.display(), "swept abandoned workspace");
                    removed.push(path);
                }
                Err(err) => {
                    tracing::warn!(workspace = %path.display(), error = %format!("{err:#}"), "failed to sweep workspace");
                }
            }
        }
        removed
    }

    pub fn prune_backups(&self, max_age_secs: u64, now_unix: u64) -> PruneReport {
        BackupManager::new(self.layout.backups_dir()).prune(max_age_secs, now_unix)
    }
}

/// Search order within one root: `<root>/<id>`, then a child named `<id>`
/// or starting with `<id>-`, then `<root>/<child>/<id>`, then the staged or
/// unpacked tree of a leftover workspace. Empty directories never match, and
/// a prefixed child only matches if its manifest does not name some other
/// component (`foo-bar/` is not a copy of `foo`).
fn find_in_root(root: &Path, component_id: &str) -> Option<PathBuf> {
    let direct = root.join(component_id);
    if direct.is_dir() && dir_is_non_empty(&direct) {
        return Some(direct);
    }

    let mut children: Vec<PathBuf> = fs::read_dir(root)
        .ok()?
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    children.sort();

    let prefix = format!("{component_id}-");
    for child in &children {
        let name = child
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let matches = name == component_id
            || (name.starts_with(&prefix) && manifest_allows(child, component_id));
        if matches && dir_is_non_empty(child) {
            return Some(child.clone());
        }
    }

    for child in &children {
        let nested = child.join(component_id);
        if nested.is_dir() && dir_is_non_empty(&nested) {
            return Some(nested);
        }
    }

    for child in &children {
        for step in ["stage", "unpacked"] {
            let in_workspace = child.join(step).join(component_id);
            if in_workspace.is_dir() && dir_is_non_empty(&in_workspace) {
                return Some(in_workspace);
            }
        }
    }
    None
}

fn manifest_allows(dir: &Path, component_id: &str) -> bool {
    let Ok(content) = fs::read_to_string(dir.join(COMPONENT_MANIFEST_FILE)) else {
        return true;
    };
    match ComponentManifest::from_toml_str(&content) {
        Ok(manifest) => manifest
            .name
            .map_or(true, |name| name == component_id),
        Err(err) => {
            tracing::debug!(dir = %dir.display(), error = %format!("{err:#}"), "skipping rescue candidate with unreadable manifest");
            false
        }
    }
}
