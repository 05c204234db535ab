mod api;
mod archive;
mod component;
mod error;
mod outcome;
mod version;

pub use api::{
    BatchMode, BatchResponse, ComponentSelection, ComponentStatus, DirStatus, ErrorBody,
    PreflightReport, RescueRequest, RescueResponse, UpdateRequest,
};
pub use archive::ArchiveType;
pub use component::{
    normalize_identifier, validate_identifier, Component, ComponentManifest, UpdateCandidate,
    COMPONENT_MANIFEST_FILE,
};
pub use error::{UpdateError, UpdateErrorKind};
pub use outcome::{PlanAction, PlanEntry, UpdateAction, UpdateResult, UpdateState};
pub use version::ComponentVersion;
