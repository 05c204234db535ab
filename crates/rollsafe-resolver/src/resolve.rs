use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rollsafe_core::{Component, ComponentVersion, PlanAction, PlanEntry, UpdateCandidate};
use rollsafe_registry::{AvailableUpdateCache, CacheEntry, CachedRelease, ConfiguredRegistry};

/// The release in `latest` if it is strictly newer than `installed`.
pub fn newer_release<'a>(
    installed: &ComponentVersion,
    latest: Option<&'a CachedRelease>,
) -> Option<&'a CachedRelease> {
    latest.filter(|cached| cached.release.version.is_newer_than(installed))
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/// Decides whether a newer release of an installed component exists.
///
/// Lookups go through the available-update cache first; only a cache miss
/// reaches the registry. Registry failures are logged and reported as "no
/// update known" without being cached, so the next lookup retries.
pub struct PackageResolver {
    registry: ConfiguredRegistry,
    cache: Option<AvailableUpdateCache>,
}

impl PackageResolver {
    pub fn new(registry: ConfiguredRegistry, cache: Option<AvailableUpdateCache>) -> Self {
        Self { registry, cache }
    }

    pub fn resolve(&self, component: &Component) -> Option<UpdateCandidate> {
        self.resolve_at(component, unix_now())
    }

    pub fn resolve_at(&self, component: &Component, now_unix: u64) -> Option<UpdateCandidate> {
        let installed = installed_version(component)?;
        let latest = self.latest_known(&component.identifier, now_unix);
        let cached = newer_release(&installed, latest.as_ref())?;

        Some(UpdateCandidate {
            component_id: component.identifier.clone(),
            current_version: component.installed_version.clone(),
            target_version: cached.release.version.to_string(),
            package_reference: cached.release.package.clone(),
            sha256: cached.release.sha256.clone(),
            source: cached.source.clone(),
        })
    }

    pub fn plan(&self, component: &Component) -> PlanEntry {
        self.plan_at(component, unix_now())
    }

    pub fn plan_at(&self, component: &Component, now_unix: u64) -> PlanEntry {
        let mut entry = PlanEntry {
            component_id: component.identifier.clone(),
            ok: true,
            action: PlanAction::UpToDate,
            from_version: Some(component.installed_version.clone()),
            to_version: Some(component.installed_version.clone()),
            source: None,
            messages: Vec::new(),
        };

        let Some(installed) = installed_version(component) else {
            entry.messages.push(format!(
                "Installed version '{}' is not comparable; no update offered.",
                component.installed_version
            ));
            return entry;
        };

        let latest = self.latest_known(&component.identifier, now_unix);
        match newer_release(&installed, latest.as_ref()) {
            Some(cached) => {
                entry.action = PlanAction::WouldUpdate;
                entry.to_version = Some(cached.release.version.to_string());
                entry.source = Some(cached.source.clone());
                entry
                    .messages
                    .push(format!("New version detected via source '{}'.", cached.source));
            }
            None => entry.messages.push("No update available.".to_string()),
        }
        entry
    }

    /// Newest published version of `component_id`, whether or not it is an
    /// update for what is installed.
    pub fn available_version(&self, component_id: &str) -> Option<String> {
        self.latest_known(component_id, unix_now())
            .map(|cached| cached.release.version.to_string())
    }

    /// Drop every cached lookup so the next resolve asks the registry again.
    pub fn refresh(&self) -> Result<()> {
        match &self.cache {
            Some(cache) => cache.clear(),
            None => Ok(()),
        }
    }

    fn latest_known(&self, component_id: &str, now_unix: u64) -> Option<CachedRelease> {
        if let Some(cache) = &self.cache {
            match cache.get(component_id, now_unix) {
                Ok(Some(entry)) => {
                    tracing::debug!(component = component_id, "update cache hit");
                    return entry.latest;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(component = component_id, error = %format!("{err:#}"), "update cache unreadable");
                }
            }
        }

        let latest = match self.registry.latest_release(component_id) {
            Ok(found) => found.map(|(source, release)| CachedRelease { source, release }),
            Err(err) => {
                tracing::warn!(
                    component = component_id,
                    error = %format!("{err:#}"),
                    "registry lookup failed; treating as no update known"
                );
                return None;
            }
        };

        if let Some(cache) = &self.cache {
            let entry = CacheEntry {
                checked_at_unix: now_unix,
                latest: latest.clone(),
            };
            if let Err(err) = cache.put(component_id, entry) {
                tracing::warn!(component = component_id, error = %format!("{err:#}"), "failed to store update cache entry");
            }
        }
        latest
    }
}

fn installed_version(component: &Component) -> Option<ComponentVersion> {
    match ComponentVersion::parse(&component.installed_version) {
        Ok(version) => Some(version),
        Err(err) => {
            tracing::warn!(
                component = %component.identifier,
                version = %component.installed_version,
                error = %err,
                "installed version is not comparable"
            );
            None
        }
    }
}
