use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rollsafe_core::{
    validate_identifier, Component, ComponentManifest, COMPONENT_MANIFEST_FILE,
};
use serde::{Deserialize, Serialize};

use crate::HostLayout;

/// Capabilities the orchestrator needs from whatever hosts the components.
pub trait ComponentHost: Send + Sync {
    fn list_components(&self) -> Result<Vec<Component>>;

    fn component(&self, component_id: &str) -> Result<Option<Component>>;

    fn install_path(&self, component_id: &str) -> PathBuf;

    fn activate(&self, component_id: &str) -> Result<()>;

    fn deactivate(&self, component_id: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ActiveSetFile {
    #[serde(default)]
    active: BTreeSet<String>,
}

/// Components are directories under the live root carrying a
/// `component.toml`; the active set lives in the state directory.
#[derive(Debug, Clone)]
pub struct FilesystemHost {
    layout: HostLayout,
}

impl FilesystemHost {
    pub fn new(layout: HostLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &HostLayout {
        &self.layout
    }

    fn read_manifest(&self, component_id: &str) -> Result<Option<ComponentManifest>> {
        let path = self
            .layout
            .component_path(component_id)
            .join(COMPONENT_MANIFEST_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading manifest: {}", path.display()));
            }
        };
        let manifest = ComponentManifest::from_toml_str(&content)
            .with_context(|| format!("failed parsing manifest: {}", path.display()))?;
        Ok(Some(manifest))
    }

    fn load_active_set(&self) -> Result<BTreeSet<String>> {
        let path = self.layout.active_set_path();
        match fs::read_to_string(&path) {
            Ok(content) => {
                let file: ActiveSetFile = toml::from_str(&content)
                    .with_context(|| format!("failed parsing active set: {}", path.display()))?;
                Ok(file.active)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(err) => {
                Err(err).with_context(|| format!("failed reading active set: {}", path.display()))
            }
        }
    }

    fn save_active_set(&self, active: BTreeSet<String>) -> Result<()> {
        let path = self.layout.active_set_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = toml::to_string(&ActiveSetFile { active })
            .with_context(|| format!("failed serializing active set: {}", path.display()))?;
        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("failed writing active set: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed committing active set: {}", path.display()))
    }

    fn build_component(
        &self,
        component_id: &str,
        manifest: ComponentManifest,
        active: &BTreeSet<String>,
    ) -> Component {
        Component {
            identifier: component_id.to_string(),
            name: manifest.name,
            installed_version: manifest.version.to_string(),
            install_path: self.layout.component_path(component_id),
            active: active.contains(component_id),
        }
    }
}

impl ComponentHost for FilesystemHost {
    fn list_components(&self) -> Result<Vec<Component>> {
        let root = self.layout.components_dir();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let active = self.load_active_set()?;
        let mut components = Vec::new();
        for entry in fs::read_dir(root)
            .with_context(|| format!("failed to read component root: {}", root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let component_id = entry.file_name().to_string_lossy().to_string();
            if validate_identifier(&component_id).is_err() {
                tracing::debug!(dir = %entry.path().display(), "skipping directory with invalid component name");
                continue;
            }
            match self.read_manifest(&component_id) {
                Ok(Some(manifest)) => {
                    components.push(self.build_component(&component_id, manifest, &active));
                }
                Ok(None) => {
                    tracing::debug!(dir = %entry.path().display(), "skipping directory without component manifest");
                }
                Err(err) => {
                    tracing::debug!(dir = %entry.path().display(), error = %format!("{err:#}"), "skipping directory with unreadable manifest");
                }
            }
        }

        components.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(components)
    }

    fn component(&self, component_id: &str) -> Result<Option<Component>> {
        if validate_identifier(component_id).is_err() {
            return Ok(None);
        }
        let manifest = match self.read_manifest(component_id) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Ok(None),
            Err(err) => {
                tracing::debug!(component = component_id, error = %format!("{err:#}"), "component manifest unreadable");
                return Ok(None);
            }
        };
        let active = self.load_active_set()?;
        Ok(Some(self.build_component(component_id, manifest, &active)))
    }

    fn install_path(&self, component_id: &str) -> PathBuf {
        self.layout.component_path(component_id)
    }

    fn activate(&self, component_id: &str) -> Result<()> {
        validate_identifier(component_id)?;
        let manifest = self.read_manifest(component_id)?.with_context(|| {
            format!(
                "cannot activate '{component_id}': no {COMPONENT_MANIFEST_FILE} in {}",
                self.layout.component_path(component_id).display()
            )
        })?;
        if let Some(name) = &manifest.name {
            if name != component_id {
                anyhow::bail!(
                    "cannot activate '{component_id}': manifest names component '{name}'"
                );
            }
        }

        let mut active = self.load_active_set()?;
        if active.insert(component_id.to_string()) {
            self.save_active_set(active)?;
        }
        Ok(())
    }

    fn deactivate(&self, component_id: &str) -> Result<()> {
        let mut active = self.load_active_set()?;
        if active.remove(component_id) {
            self.save_active_set(active)?;
        }
        Ok(())
    }
}
