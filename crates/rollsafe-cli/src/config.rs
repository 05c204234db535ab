use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rollsafe_registry::{validate_sources, AvailableUpdateCache, ConfiguredRegistry, RegistrySourceConfig};
use rollsafe_resolver::PackageResolver;
use rollsafe_updater::{
    BackupRetention, FetchOptions, FilesystemHost, HostLayout, HttpTransport, Orchestrator,
    UpdateOptions, DEFAULT_FETCH_RETRIES, DEFAULT_IDEMPOTENCY_TTL_SECS, DEFAULT_LOCK_TTL_SECS,
    DEFAULT_MIN_FREE_BYTES, DEFAULT_MIN_PACKAGE_BYTES,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "rollsafe.toml";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8787";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RollsafeConfig {
    pub root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components_dir: Option<PathBuf>,
    pub registry: RegistryConfig,
    pub fetch: FetchConfig,
    pub health: HealthConfig,
    pub lock: LockConfig,
    pub idempotency: IdempotencyConfig,
    pub backups: BackupsConfig,
    pub preflight: PreflightConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub sources: Vec<RegistrySourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub min_package_bytes: u64,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdempotencyConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupsConfig {
    pub max_age_secs: u64,
    pub retention: BackupRetention,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreflightConfig {
    pub min_free_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for RollsafeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            components_dir: None,
            registry: RegistryConfig::default(),
            fetch: FetchConfig::default(),
            health: HealthConfig::default(),
            lock: LockConfig::default(),
            idempotency: IdempotencyConfig::default(),
            backups: BackupsConfig::default(),
            preflight: PreflightConfig::default(),
            cache: CacheConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            min_package_bytes: DEFAULT_MIN_PACKAGE_BYTES,
            retries: DEFAULT_FETCH_RETRIES,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            target: None,
            timeout_secs: 10,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_LOCK_TTL_SECS,
        }
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_IDEMPOTENCY_TTL_SECS,
        }
    }
}

impl Default for BackupsConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 3_600,
            retention: BackupRetention::Keep,
        }
    }
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 43_200 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

impl RollsafeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("failed parsing rollsafe config")?;
        validate_sources(&config.registry.sources).context("invalid [registry] sources")?;
        Ok(config)
    }

    /// Load `path`. A missing file yields defaults unless `required` is set,
    /// which is the case when the path was named explicitly.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)
                .with_context(|| format!("invalid config file: {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed reading config file: {}", path.display()))
            }
        }
    }

    pub fn with_root_override(mut self, root: Option<PathBuf>) -> Self {
        if let Some(root) = root {
            self.root = root;
        }
        self
    }

    pub fn layout(&self) -> HostLayout {
        let layout = HostLayout::new(&self.root);
        match &self.components_dir {
            Some(dir) if dir.is_absolute() => layout.with_components_dir(dir),
            Some(dir) => layout.with_components_dir(self.root.join(dir)),
            None => layout,
        }
    }

    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions {
            fetch: FetchOptions {
                timeout: Duration::from_secs(self.fetch.timeout_secs),
                min_package_bytes: self.fetch.min_package_bytes,
            },
            health_target: self
                .health
                .target
                .as_deref()
                .map(str::trim)
                .filter(|target| !target.is_empty())
                .map(str::to_string),
            health_timeout: Duration::from_secs(self.health.timeout_secs),
            lock_ttl_secs: self.lock.ttl_secs,
            idempotency_ttl_secs: self.idempotency.ttl_secs,
            min_free_bytes: self.preflight.min_free_bytes,
            retention: self.backups.retention,
        }
    }

    pub fn build_orchestrator(&self) -> Result<Orchestrator> {
        let layout = self.layout();
        let registry = ConfiguredRegistry::from_config(
            &self.registry.sources,
            Duration::from_secs(self.fetch.timeout_secs),
        )?;
        if registry.is_empty() {
            tracing::warn!("no enabled registry sources configured; no updates will be found");
        }
        let cache = AvailableUpdateCache::new(layout.update_cache_path(), self.cache.ttl_secs);
        let resolver = PackageResolver::new(registry, Some(cache));
        let host = FilesystemHost::new(layout.clone());
        Ok(
            Orchestrator::new(layout, Box::new(host), resolver, self.update_options())
                .with_transport(Box::new(HttpTransport::new(self.fetch.retries))),
        )
    }
}
