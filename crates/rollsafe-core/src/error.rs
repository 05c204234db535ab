use std::fmt;

use serde::{Deserialize, Serialize};

use crate::outcome::UpdateAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateErrorKind {
    NotFound,
    DownloadError,
    TooSmallPackage,
    ChecksumMismatch,
    UnzipError,
    StageError,
    BackupError,
    SwapError,
    HealthCheckFailed,
    ReactivationFailed,
    RestoreFailed,
    LockConflict,
    PreflightFailed,
    NoValidComponents,
    Other,
}

impl UpdateErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::DownloadError => "download_error",
            Self::TooSmallPackage => "too_small_package",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::UnzipError => "unzip_error",
            Self::StageError => "stage_error",
            Self::BackupError => "backup_error",
            Self::SwapError => "swap_error",
            Self::HealthCheckFailed => "health_check_failed",
            Self::ReactivationFailed => "reactivation_failed",
            Self::RestoreFailed => "restore_failed",
            Self::LockConflict => "lock_conflict",
            Self::PreflightFailed => "preflight_failed",
            Self::NoValidComponents => "no_valid_components",
            Self::Other => "other",
        }
    }

    /// Per-component action reported for a failure of this kind; `None`
    /// for batch-level kinds, which abort before any component is touched.
    pub fn action(self) -> Option<UpdateAction> {
        let action = match self {
            Self::NotFound => UpdateAction::NotFound,
            Self::DownloadError | Self::TooSmallPackage | Self::ChecksumMismatch => {
                UpdateAction::DownloadError
            }
            Self::UnzipError => UpdateAction::UnzipError,
            Self::StageError | Self::Other => UpdateAction::StageError,
            Self::BackupError => UpdateAction::BackupError,
            Self::SwapError | Self::RestoreFailed => UpdateAction::SwapError,
            Self::HealthCheckFailed => UpdateAction::HealthCheckFailed,
            Self::ReactivationFailed => UpdateAction::ReactivationFailed,
            Self::LockConflict | Self::PreflightFailed | Self::NoValidComponents => return None,
        };
        Some(action)
    }
}

impl fmt::Display for UpdateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one pipeline step or of a whole batch.
///
/// Steps work with `anyhow` internally and convert at their boundary, so
/// the message keeps the full context chain.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("component '{0}' is not installed")]
    NotFound(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("downloaded package is unexpectedly small: {path} ({size} bytes, minimum {minimum})")]
    TooSmallPackage { path: String, size: u64, minimum: u64 },
    #[error("package checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("unpack failed: {0}")]
    Unzip(String),
    #[error("staging failed: {0}")]
    Stage(String),
    #[error("backup failed: {0}")]
    Backup(String),
    #[error("swap failed: {0}")]
    Swap(String),
    #[error("health check failed: {0}")]
    HealthCheck(String),
    #[error("reactivation failed: {0}")]
    Reactivation(String),
    #[error("restore failed: {0}")]
    Restore(String),
    #[error("another update batch is running{holder}")]
    LockConflict { holder: String },
    #[error("update blocked: {0}")]
    PreflightFailed(String),
    #[error("no requested components resolve to installed identifiers")]
    NoValidComponents,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UpdateError {
    pub fn kind(&self) -> UpdateErrorKind {
        match self {
            Self::NotFound(_) => UpdateErrorKind::NotFound,
            Self::Download(_) => UpdateErrorKind::DownloadError,
            Self::TooSmallPackage { .. } => UpdateErrorKind::TooSmallPackage,
            Self::ChecksumMismatch { .. } => UpdateErrorKind::ChecksumMismatch,
            Self::Unzip(_) => UpdateErrorKind::UnzipError,
            Self::Stage(_) => UpdateErrorKind::StageError,
            Self::Backup(_) => UpdateErrorKind::BackupError,
            Self::Swap(_) => UpdateErrorKind::SwapError,
            Self::HealthCheck(_) => UpdateErrorKind::HealthCheckFailed,
            Self::Reactivation(_) => UpdateErrorKind::ReactivationFailed,
            Self::Restore(_) => UpdateErrorKind::RestoreFailed,
            Self::LockConflict { .. } => UpdateErrorKind::LockConflict,
            Self::PreflightFailed(_) => UpdateErrorKind::PreflightFailed,
            Self::NoValidComponents => UpdateErrorKind::NoValidComponents,
            Self::Other(_) => UpdateErrorKind::Other,
        }
    }

    /// Per-component action for this failure. Batch-level errors never
    /// reach a component result, so they fall back to `stage_error`.
    pub fn action(&self) -> UpdateAction {
        self.kind().action().unwrap_or(UpdateAction::StageError)
    }

    pub fn download(err: anyhow::Error) -> Self {
        Self::Download(format!("{err:#}"))
    }

    pub fn unzip(err: anyhow::Error) -> Self {
        Self::Unzip(format!("{err:#}"))
    }

    pub fn stage(err: anyhow::Error) -> Self {
        Self::Stage(format!("{err:#}"))
    }

    pub fn backup(err: anyhow::Error) -> Self {
        Self::Backup(format!("{err:#}"))
    }

    pub fn swap(err: anyhow::Error) -> Self {
        Self::Swap(format!("{err:#}"))
    }

    pub fn restore(err: anyhow::Error) -> Self {
        Self::Restore(format!("{err:#}"))
    }

    pub fn reactivation(err: anyhow::Error) -> Self {
        Self::Reactivation(format!("{err:#}"))
    }

    pub fn lock_conflict(holder: Option<&str>) -> Self {
        Self::LockConflict {
            holder: holder
                .map(|holder| format!(" (holder={holder})"))
                .unwrap_or_default(),
        }
    }
}
