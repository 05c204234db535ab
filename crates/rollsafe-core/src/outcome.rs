use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{UpdateError, UpdateErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    Updated,
    UpToDate,
    DownloadError,
    UnzipError,
    StageError,
    BackupError,
    SwapError,
    HealthCheckFailed,
    ReactivationFailed,
    NotFound,
}

impl UpdateAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::UpToDate => "up_to_date",
            Self::DownloadError => "download_error",
            Self::UnzipError => "unzip_error",
            Self::StageError => "stage_error",
            Self::BackupError => "backup_error",
            Self::SwapError => "swap_error",
            Self::HealthCheckFailed => "health_check_failed",
            Self::ReactivationFailed => "reactivation_failed",
            Self::NotFound => "not_found",
        }
    }
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-component pipeline state.
///
/// `RolledBack` is only reachable once a backup exists. `Failed` after
/// `Swapping` means the restore itself failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Planned,
    Downloading,
    Unpacking,
    Staging,
    BackingUp,
    Swapping,
    HealthChecking,
    Reactivating,
    Done,
    RolledBack,
    Failed,
}

impl UpdateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Downloading => "downloading",
            Self::Unpacking => "unpacking",
            Self::Staging => "staging",
            Self::BackingUp => "backing_up",
            Self::Swapping => "swapping",
            Self::HealthChecking => "health_checking",
            Self::Reactivating => "reactivating",
            Self::Done => "done",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::RolledBack | Self::Failed)
    }

    /// Whether a failure in this state may have mutated the live component
    /// directory, and therefore needs a restore from backup.
    pub fn requires_rollback(self) -> bool {
        matches!(
            self,
            Self::Swapping | Self::HealthChecking | Self::Reactivating
        )
    }

    pub fn can_transition_to(self, next: UpdateState) -> bool {
        use UpdateState::*;
        match (self, next) {
            (Planned, Downloading | Done | Failed) => true,
            (Downloading, Unpacking | Failed) => true,
            (Unpacking, Staging | Failed) => true,
            (Staging, BackingUp | Failed) => true,
            (BackingUp, Swapping | Failed) => true,
            (Swapping, HealthChecking | RolledBack | Failed) => true,
            (HealthChecking, Reactivating | RolledBack | Failed) => true,
            (Reactivating, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one component's update attempt within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub component_id: String,
    pub ok: bool,
    pub action: UpdateAction,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
    pub final_state: UpdateState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<UpdateErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    #[serde(default)]
    pub requires_intervention: bool,
}

impl UpdateResult {
    pub fn not_found(component_id: &str) -> Self {
        Self {
            component_id: component_id.to_string(),
            ok: false,
            action: UpdateAction::NotFound,
            from_version: None,
            to_version: None,
            messages: vec!["Component not installed or invalid identifier.".to_string()],
            final_state: UpdateState::Failed,
            error_kind: Some(UpdateErrorKind::NotFound),
            backup_path: None,
            requires_intervention: false,
        }
    }

    pub fn up_to_date(component_id: &str, version: &str) -> Self {
        Self {
            component_id: component_id.to_string(),
            ok: true,
            action: UpdateAction::UpToDate,
            from_version: Some(version.to_string()),
            to_version: Some(version.to_string()),
            messages: vec!["No update available.".to_string()],
            final_state: UpdateState::Done,
            error_kind: None,
            backup_path: None,
            requires_intervention: false,
        }
    }

    /// A failure before anything live was touched.
    pub fn failed(
        component_id: &str,
        from_version: &str,
        error: &UpdateError,
        messages: Vec<String>,
    ) -> Self {
        Self {
            component_id: component_id.to_string(),
            ok: false,
            action: error.action(),
            from_version: Some(from_version.to_string()),
            to_version: None,
            messages,
            final_state: UpdateState::Failed,
            error_kind: Some(error.kind()),
            backup_path: None,
            requires_intervention: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    WouldUpdate,
    UpToDate,
    NotFound,
}

impl PlanAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WouldUpdate => "would_update",
            Self::UpToDate => "up_to_date",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub component_id: String,
    pub ok: bool,
    pub action: PlanAction,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl PlanEntry {
    pub fn not_found(component_id: &str) -> Self {
        Self {
            component_id: component_id.to_string(),
            ok: false,
            action: PlanAction::NotFound,
            from_version: None,
            to_version: None,
            source: None,
            messages: vec!["Component not installed or invalid identifier.".to_string()],
        }
    }
}
