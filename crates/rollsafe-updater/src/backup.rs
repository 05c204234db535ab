use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::fs_utils::{copy_dir_recursive, current_unix_timestamp, remove_dir_if_exists};

const SIDECAR_SUFFIX: &str = ".backup.toml";

/// A full copy of one component's install directory taken before a swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub component_id: String,
    pub path: PathBuf,
    pub created_at_unix: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BackupSidecar {
    component_id: String,
    created_at_unix: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot(&self, component_id: &str, install_path: &Path) -> Result<Backup> {
        self.snapshot_at(component_id, install_path, current_unix_timestamp()?)
    }

    /// Copy (never move) `install_path` into a fresh timestamped directory.
    /// A partial copy is removed before the error is returned.
    pub fn snapshot_at(
        &self,
        component_id: &str,
        install_path: &Path,
        now_unix: u64,
    ) -> Result<Backup> {
        if !install_path.is_dir() {
            return Err(anyhow!(
                "install path is not a directory: {}",
                install_path.display()
            ));
        }
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;

        let path = self.unique_backup_path(component_id, now_unix)?;
        if let Err(err) = copy_dir_recursive(install_path, &path) {
            let _ = remove_dir_if_exists(&path);
            return Err(err.context(format!(
                "failed to copy {} into backup {}",
                install_path.display(),
                path.display()
            )));
        }

        let sidecar = BackupSidecar {
            component_id: component_id.to_string(),
            created_at_unix: now_unix,
        };
        let sidecar_path = sidecar_path_for(&path);
        let written = toml::to_string(&sidecar)
            .context("failed serializing backup sidecar")
            .and_then(|content| {
                fs::write(&sidecar_path, content).with_context(|| {
                    format!("failed writing backup sidecar {}", sidecar_path.display())
                })
            });
        if let Err(err) = written {
            let _ = remove_dir_if_exists(&path);
            return Err(err);
        }

        Ok(Backup {
            component_id: component_id.to_string(),
            path,
            created_at_unix: now_unix,
        })
    }

    /// Replace whatever is at `live_path` with the backup's contents. The
    /// backup itself is kept, so restoring twice is harmless.
    pub fn restore(&self, backup: &Backup, live_path: &Path) -> Result<()> {
        if !backup.path.is_dir() {
            return Err(anyhow!("backup is missing: {}", backup.path.display()));
        }

        let mut restoring = live_path.as_os_str().to_owned();
        restoring.push(".restoring");
        let restoring = PathBuf::from(restoring);
        remove_dir_if_exists(&restoring)?;
        if let Err(err) = copy_dir_recursive(&backup.path, &restoring) {
            let _ = remove_dir_if_exists(&restoring);
            return Err(err.context(format!(
                "failed to copy backup {} for restore",
                backup.path.display()
            )));
        }

        remove_dir_if_exists(live_path)?;
        fs::rename(&restoring, live_path).with_context(|| {
            format!(
                "failed to move restored files into {}",
                live_path.display()
            )
        })
    }

    pub fn list(&self) -> Result<Vec<Backup>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.root.display()));
            }
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            let sidecar_path = sidecar_path_for(&path);
            let sidecar = match fs::read_to_string(&sidecar_path)
                .map_err(anyhow::Error::from)
                .and_then(|content| Ok(toml::from_str::<BackupSidecar>(&content)?))
            {
                Ok(sidecar) => sidecar,
                Err(err) => {
                    tracing::debug!(backup = %path.display(), error = %err, "skipping backup without readable sidecar");
                    continue;
                }
            };
            backups.push(Backup {
                component_id: sidecar.component_id,
                path,
                created_at_unix: sidecar.created_at_unix,
            });
        }

        backups.sort_by(|a, b| {
            a.created_at_unix
                .cmp(&b.created_at_unix)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(backups)
    }

    pub fn discard(&self, backup: &Backup) -> Result<()> {
        remove_dir_if_exists(&backup.path)?;
        remove_dir_if_exists(&sidecar_path_for(&backup.path))
    }

    /// Delete backups older than `max_age_secs`. Failures are logged and
    /// reported, never raised.
    pub fn prune(&self, max_age_secs: u64, now_unix: u64) -> PruneReport {
        let mut report = PruneReport::default();
        let backups = match self.list() {
            Ok(backups) => backups,
            Err(err) => {
                tracing::warn!(root = %self.root.display(), error = %format!("{err:#}"), "failed to list backups for pruning");
                report
                    .failed
                    .push((self.root.clone(), format!("{err:#}")));
                return report;
            }
        };

        for backup in backups {
            if now_unix.saturating_sub(backup.created_at_unix) <= max_age_secs {
                continue;
            }
            match self.discard(&backup) {
                Ok(()) => {
                    tracing::info!(backup = %backup.path.display(), "pruned backup");
                    report.removed.push(backup.path);
                }
                Err(err) => {
                    tracing::warn!(backup = %backup.path.display(), error = %format!("{err:#}"), "failed to prune backup");
                    report.failed.push((backup.path, format!("{err:#}")));
                }
            }
        }
        report
    }

    fn unique_backup_path(&self, component_id: &str, now_unix: u64) -> Result<PathBuf> {
        let stamp = chrono::DateTime::from_timestamp(now_unix as i64, 0)
            .ok_or_else(|| anyhow!("timestamp out of range: {now_unix}"))?
            .format("%Y%m%d-%H%M%S")
            .to_string();
        let base = format!("{component_id}-{stamp}");
        let mut candidate = self.root.join(&base);
        let mut suffix = 1;
        while candidate.exists() {
            candidate = self.root.join(format!("{base}-{suffix}"));
            suffix += 1;
        }
        Ok(candidate)
    }
}

fn sidecar_path_for(backup_path: &Path) -> PathBuf {
    let mut name = backup_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(SIDECAR_SUFFIX);
    backup_path.with_file_name(name)
}
