use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout of one managed host.
///
/// ```text
/// <root>/components/<id>/               live installs (overridable)
/// <root>/state/                         lock, active set, caches
/// <root>/upgrade/attempt-*/             per-attempt scratch workspaces
/// <root>/upgrade-temp-backup/components rollback root scanned by rescue
/// <root>/backups/<id>-<timestamp>/      pre-swap snapshots
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    root: PathBuf,
    components_dir: PathBuf,
}

impl HostLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let components_dir = root.join("components");
        Self {
            root,
            components_dir,
        }
    }

    pub fn with_components_dir(mut self, components_dir: impl Into<PathBuf>) -> Self {
        self.components_dir = components_dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn components_dir(&self) -> &Path {
        &self.components_dir
    }

    pub fn component_path(&self, component_id: &str) -> PathBuf {
        self.components_dir.join(component_id)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn active_set_path(&self) -> PathBuf {
        self.state_dir().join("active-components.toml")
    }

    pub fn update_cache_path(&self) -> PathBuf {
        self.state_dir().join("available-updates.json")
    }

    pub fn batch_lock_path(&self) -> PathBuf {
        self.state_dir().join("batch.lock")
    }

    pub fn idempotency_dir(&self) -> PathBuf {
        self.state_dir().join("idempotency")
    }

    pub fn idempotency_record_path(&self, key_digest: &str) -> PathBuf {
        self.idempotency_dir().join(format!("{key_digest}.json"))
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("upgrade")
    }

    pub fn rollback_dir(&self) -> PathBuf {
        self.root
            .join("upgrade-temp-backup")
            .join("components")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.components_dir.clone(),
            self.state_dir(),
            self.idempotency_dir(),
            self.scratch_dir(),
            self.rollback_dir(),
            self.backups_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
