use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};

use crate::fs_utils::current_unix_timestamp;
use crate::HostLayout;

static WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(0);

pub const WORKSPACE_PREFIX: &str = "attempt-";

/// Scratch space owned by exactly one update attempt. The directory tree is
/// removed when the guard drops, whatever the outcome of the attempt.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    download_path: PathBuf,
    unpack_dir: PathBuf,
    stage_dir: PathBuf,
}

impl Workspace {
    pub fn create(layout: &HostLayout, component_id: &str) -> Result<Self> {
        let root = layout.scratch_dir().join(format!(
            "{WORKSPACE_PREFIX}{component_id}-{}-{}-{}",
            std::process::id(),
            current_unix_timestamp()?,
            WORKSPACE_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        let download_dir = root.join("download");
        let unpack_dir = root.join("unpacked");
        let stage_parent = root.join("stage");
        for dir in [&download_dir, &unpack_dir, &stage_parent] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed creating workspace dir: {}", dir.display()))?;
        }

        Ok(Self {
            download_path: download_dir.join("package"),
            stage_dir: stage_parent.join(component_id),
            unpack_dir,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn download_path(&self) -> &Path {
        &self.download_path
    }

    pub fn unpack_dir(&self) -> &Path {
        &self.unpack_dir
    }

    pub fn stage_dir(&self) -> &Path {
        &self.stage_dir
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    workspace = %self.root.display(),
                    error = %err,
                    "failed to remove update workspace"
                );
            }
        }
    }
}
