use std::collections::HashSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrySourceKind {
    Filesystem,
    Http,
}

/// One `[[registry.sources]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySourceConfig {
    pub name: String,
    pub kind: RegistrySourceKind,
    pub location: String,
    #[serde(default = "source_enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: u32,
}

fn source_enabled_default() -> bool {
    true
}

pub(crate) fn sort_sources(sources: &mut [RegistrySourceConfig]) {
    sources.sort_by(|left, right| {
        left.priority
            .cmp(&right.priority)
            .then_with(|| left.name.cmp(&right.name))
    });
}

pub fn validate_source_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        anyhow::bail!("invalid source name: must not be empty");
    }

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        anyhow::bail!("invalid source name: '{name}'");
    };

    let first_is_valid = first.is_ascii_lowercase() || first.is_ascii_digit();
    let rest_is_valid =
        chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_');
    if !first_is_valid || !rest_is_valid {
        anyhow::bail!("invalid source name: '{name}'");
    }

    Ok(())
}

pub fn validate_sources(sources: &[RegistrySourceConfig]) -> Result<()> {
    let mut seen_names: HashSet<&str> = HashSet::with_capacity(sources.len());
    for source in sources {
        validate_source_name(&source.name)?;
        if source.location.trim().is_empty() {
            anyhow::bail!("source '{}' has an empty location", source.name);
        }
        if source.kind == RegistrySourceKind::Http
            && !(source.location.starts_with("http://") || source.location.starts_with("https://"))
        {
            anyhow::bail!(
                "source '{}' is an http source but its location is not an http(s) URL: {}",
                source.name,
                source.location
            );
        }
        if !seen_names.insert(source.name.as_str()) {
            anyhow::bail!(
                "duplicate source name '{}' in registry config: remove or rename one entry",
                source.name
            );
        }
    }

    Ok(())
}
