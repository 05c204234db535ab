use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rollsafe_core::validate_identifier;

use crate::release::{ReleaseListing, ReleaseManifest};
use crate::source::{sort_sources, validate_sources, RegistrySourceConfig, RegistrySourceKind};

/// Somewhere published releases of components can be looked up.
pub trait ReleaseSource: Send + Sync {
    fn name(&self) -> &str;

    /// All known releases of `component_id`, newest first. An unknown
    /// component yields an empty list rather than an error.
    fn releases(&self, component_id: &str) -> Result<Vec<ReleaseManifest>>;
}

/// `<root>/<component_id>/*.toml`, one release manifest per file.
#[derive(Debug, Clone)]
pub struct FilesystemRegistry {
    name: String,
    root: PathBuf,
}

impl FilesystemRegistry {
    pub fn open(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ReleaseSource for FilesystemRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn releases(&self, component_id: &str) -> Result<Vec<ReleaseManifest>> {
        validate_identifier(component_id)?;
        let component_dir = self.root.join(component_id);
        if !component_dir.exists() {
            return Ok(Vec::new());
        }

        let mut manifests = Vec::new();
        for entry in fs::read_dir(&component_dir)
            .with_context(|| format!("failed to read component directory: {component_id}"))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some("toml") {
                continue;
            }

            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed reading manifest: {}", path.display()))?;
            let manifest = ReleaseManifest::from_toml_str(&content)
                .with_context(|| format!("failed parsing manifest: {}", path.display()))?;
            manifests.push(manifest.anchor_package(&component_dir));
        }

        manifests.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(manifests)
    }
}

/// `GET <base>/<component_id>.json` returning `{"releases": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    name: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpRegistry {
    pub fn new(name: impl Into<String>, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("failed to build registry http client")?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn listing_url(&self, component_id: &str) -> String {
        format!("{}/{component_id}.json", self.base_url)
    }
}

impl ReleaseSource for HttpRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn releases(&self, component_id: &str) -> Result<Vec<ReleaseManifest>> {
        validate_identifier(component_id)?;
        let url = self.listing_url(component_id);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("registry request failed: {url}"))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            anyhow::bail!("registry returned HTTP {} for {url}", status.as_u16());
        }

        let body = response
            .text()
            .with_context(|| format!("failed reading registry listing: {url}"))?;
        let listing: ReleaseListing = serde_json::from_str(&body)
            .with_context(|| format!("failed parsing registry listing: {url}"))?;
        let mut manifests = listing.releases;
        manifests.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(manifests)
    }
}

/// Every enabled configured source, consulted in priority order.
pub struct ConfiguredRegistry {
    sources: Vec<Box<dyn ReleaseSource>>,
}

impl ConfiguredRegistry {
    pub fn new(sources: Vec<Box<dyn ReleaseSource>>) -> Self {
        Self { sources }
    }

    pub fn from_config(configs: &[RegistrySourceConfig], timeout: Duration) -> Result<Self> {
        validate_sources(configs)?;
        let mut enabled: Vec<RegistrySourceConfig> =
            configs.iter().filter(|source| source.enabled).cloned().collect();
        sort_sources(&mut enabled);

        let mut sources: Vec<Box<dyn ReleaseSource>> = Vec::with_capacity(enabled.len());
        for source in enabled {
            match source.kind {
                RegistrySourceKind::Filesystem => {
                    sources.push(Box::new(FilesystemRegistry::open(
                        source.name,
                        source.location,
                    )));
                }
                RegistrySourceKind::Http => {
                    sources.push(Box::new(
                        HttpRegistry::new(source.name.clone(), &source.location, timeout)
                            .with_context(|| {
                                format!("failed configuring registry source '{}'", source.name)
                            })?,
                    ));
                }
            }
        }
        Ok(Self { sources })
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.name()).collect()
    }

    /// The newest release from the first source that knows the component.
    pub fn latest_release(&self, component_id: &str) -> Result<Option<(String, ReleaseManifest)>> {
        for source in &self.sources {
            let manifests = source.releases(component_id).with_context(|| {
                format!(
                    "failed loading component '{component_id}' from configured source '{}'",
                    source.name()
                )
            })?;
            if let Some(latest) = manifests.into_iter().next() {
                return Ok(Some((source.name().to_string(), latest)));
            }
        }
        Ok(None)
    }
}
