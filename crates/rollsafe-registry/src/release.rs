use std::path::Path;

use anyhow::{Context, Result};
use rollsafe_core::ComponentVersion;
use serde::{Deserialize, Serialize};

/// Registry record of one published component version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub version: ComponentVersion,
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ReleaseManifest {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(input).context("failed to parse release manifest")?;
        if manifest.package.trim().is_empty() {
            anyhow::bail!("release manifest {} has an empty package reference", manifest.version);
        }
        Ok(manifest)
    }

    /// Rewrites a relative local `package` path so it is anchored at `base`.
    pub(crate) fn anchor_package(mut self, base: &Path) -> Self {
        if !is_remote_reference(&self.package) && Path::new(&self.package).is_relative() {
            self.package = base.join(&self.package).to_string_lossy().to_string();
        }
        self
    }
}

pub(crate) fn is_remote_reference(reference: &str) -> bool {
    reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("file://")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ReleaseListing {
    #[serde(default)]
    pub(crate) releases: Vec<ReleaseManifest>,
}
