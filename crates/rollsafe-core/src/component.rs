use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::version::ComponentVersion;

/// Name of the metadata file every installed component carries at its root.
pub const COMPONENT_MANIFEST_FILE: &str = "component.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub identifier: String,
    pub name: Option<String>,
    pub installed_version: String,
    pub install_path: PathBuf,
    pub active: bool,
}

/// Contents of `component.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentManifest {
    pub name: Option<String>,
    pub version: ComponentVersion,
    pub description: Option<String>,
}

impl ComponentManifest {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self =
            toml::from_str(input).context("failed to parse component manifest")?;
        if let Some(name) = &manifest.name {
            validate_identifier(name)
                .with_context(|| format!("invalid component name '{name}'"))?;
        }
        Ok(manifest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCandidate {
    pub component_id: String,
    pub current_version: String,
    pub target_version: String,
    pub package_reference: String,
    pub sha256: Option<String>,
    pub source: String,
}

/// Reduce a caller-supplied reference to a bare component identifier.
///
/// Callers may address a component by its directory (`akismet`) or by a
/// path inside it (`akismet/akismet.php`); both name the same component.
pub fn normalize_identifier(input: &str) -> Option<String> {
    let trimmed = input.trim().trim_matches('/');
    let first = trimmed.split('/').next().unwrap_or("").trim();
    if validate_identifier(first).is_err() {
        return None;
    }
    Some(first.to_string())
}

pub fn validate_identifier(value: &str) -> anyhow::Result<()> {
    if value.is_empty() {
        return Err(anyhow!("component identifier must not be empty"));
    }
    if value == "." || value == ".." {
        return Err(anyhow!("component identifier must not be a relative path"));
    }
    if value.starts_with('.') {
        return Err(anyhow!("component identifier must not start with '.'"));
    }
    if !value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        return Err(anyhow!(
            "component identifier '{value}' may only contain ASCII letters, digits, '-', '_' and '.'"
        ));
    }
    Ok(())
}
