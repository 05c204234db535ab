use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::release::ReleaseManifest;

const CACHE_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRelease {
    pub source: String,
    pub release: ReleaseManifest,
}

/// Result of the last registry lookup for one component. `latest` is
/// `None` when no source knew the component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub checked_at_unix: u64,
    pub latest: Option<CachedRelease>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

/// Per-component latest-known release, persisted as JSON with a TTL.
#[derive(Debug, Clone)]
pub struct AvailableUpdateCache {
    path: PathBuf,
    ttl_secs: u64,
}

impl AvailableUpdateCache {
    pub fn new(path: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        Self {
            path: path.into(),
            ttl_secs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, component_id: &str, now_unix: u64) -> Result<Option<CacheEntry>> {
        let file = self.load()?;
        Ok(file
            .entries
            .get(component_id)
            .filter(|entry| now_unix.saturating_sub(entry.checked_at_unix) < self.ttl_secs)
            .cloned())
    }

    pub fn put(&self, component_id: &str, entry: CacheEntry) -> Result<()> {
        let mut file = self.load()?;
        file.entries.insert(component_id.to_string(), entry);
        self.save(&file)
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed clearing update cache: {}", self.path.display())
            }),
        }
    }

    fn load(&self) -> Result<CacheFile> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CacheFile::default());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed reading update cache: {}", self.path.display())
                });
            }
        };

        match serde_json::from_str::<CacheFile>(&content) {
            Ok(file) if file.version == CACHE_FILE_VERSION => Ok(file),
            Ok(_) | Err(_) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "discarding unreadable update cache"
                );
                Ok(CacheFile::default())
            }
        }
    }

    fn save(&self, file: &CacheFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating update cache directory: {}", parent.display())
            })?;
        }

        let file = CacheFile {
            version: CACHE_FILE_VERSION,
            entries: file.entries.clone(),
        };
        let content = serde_json::to_string_pretty(&file)
            .with_context(|| format!("failed serializing update cache: {}", self.path.display()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("failed writing update cache: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed committing update cache: {}", self.path.display()))
    }
}
