use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::outcome::{PlanEntry, UpdateResult};

/// Which installed components a batch targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSelection", into = "RawSelection")]
pub enum ComponentSelection {
    All,
    Ids(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawSelection {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<RawSelection> for ComponentSelection {
    type Error = String;

    fn try_from(raw: RawSelection) -> Result<Self, Self::Error> {
        match raw {
            RawSelection::One(value) if value.trim().eq_ignore_ascii_case("all") => Ok(Self::All),
            RawSelection::One(value) => Ok(Self::Ids(vec![value])),
            RawSelection::Many(values)
                if values.len() == 1 && values[0].trim().eq_ignore_ascii_case("all") =>
            {
                Ok(Self::All)
            }
            RawSelection::Many(values) => Ok(Self::Ids(values)),
        }
    }
}

impl From<ComponentSelection> for RawSelection {
    fn from(selection: ComponentSelection) -> Self {
        match selection {
            ComponentSelection::All => RawSelection::One("all".to_string()),
            ComponentSelection::Ids(ids) => RawSelection::Many(ids),
        }
    }
}

impl ComponentSelection {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    Single,
    Bulk,
}

impl BatchMode {
    pub fn for_count(count: usize) -> Self {
        if count == 1 {
            Self::Single
        } else {
            Self::Bulk
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Bulk => "bulk",
        }
    }
}

fn default_true() -> bool {
    true
}

/// Body of `POST /updates` and the input of a CLI `update`/`plan` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub components: ComponentSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<BatchMode>,
    #[serde(default = "default_true")]
    pub health_check: bool,
    #[serde(default = "default_true")]
    pub reactivate_after: bool,
    #[serde(default)]
    pub deactivate_during_swap: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl UpdateRequest {
    pub fn new(components: ComponentSelection) -> Self {
        Self {
            components,
            idempotency_key: None,
            dry_run: false,
            mode: None,
            health_check: true,
            reactivate_after: true,
            deactivate_during_swap: false,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub ok: bool,
    pub dry_run: bool,
    pub mode: BatchMode,
    pub updated: Vec<String>,
    pub results: IndexMap<String, UpdateResult>,
    pub plan: IndexMap<String, PlanEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub ok: bool,
    pub why: Vec<String>,
    pub dirs: IndexMap<String, DirStatus>,
    pub zip: bool,
    pub transport: bool,
    pub external_decoders: Vec<String>,
    pub free_bytes: Option<u64>,
    pub min_free_bytes: u64,
}

/// One row of `GET /updates/status` and `rollsafe status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub component_id: String,
    pub name: Option<String>,
    pub installed_version: String,
    pub active: bool,
    pub available_version: Option<String>,
    pub has_update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescueRequest {
    pub component: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescueResponse {
    pub ok: bool,
    pub rescued: bool,
}

/// Body returned for batch-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.to_string(),
            message: message.into(),
        }
    }
}
