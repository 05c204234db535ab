use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::fs_utils::{move_dir_or_copy, remove_dir_if_exists};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapMethod {
    Rename,
    CopyFallback,
}

impl SwapMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rename => "rename",
            Self::CopyFallback => "copy-fallback",
        }
    }
}

impl fmt::Display for SwapMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replaces a live component directory with a staged one.
pub trait SwapExecutor: Send + Sync {
    fn swap(&self, staged_dir: &Path, live_path: &Path) -> Result<SwapMethod>;
}

/// Removes the live directory, then renames the staged tree into place,
/// copying instead when the rename is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSwapExecutor;

impl SwapExecutor for FsSwapExecutor {
    fn swap(&self, staged_dir: &Path, live_path: &Path) -> Result<SwapMethod> {
        if !staged_dir.is_dir() {
            return Err(anyhow!(
                "staged directory is missing: {}",
                staged_dir.display()
            ));
        }
        remove_dir_if_exists(live_path)?;
        let copied = move_dir_or_copy(staged_dir, live_path)?;
        Ok(if copied {
            SwapMethod::CopyFallback
        } else {
            SwapMethod::Rename
        })
    }
}
