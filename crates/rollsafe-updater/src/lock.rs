use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rollsafe_core::UpdateError;
use serde::{Deserialize, Serialize};

use crate::fs_utils::{current_unix_timestamp, path_age_secs, remove_file_if_exists};

pub const DEFAULT_LOCK_TTL_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder: String,
    pub acquired_at_unix: u64,
    pub ttl_secs: u64,
}

impl LockRecord {
    pub fn is_expired(&self, now_unix: u64) -> bool {
        now_unix.saturating_sub(self.acquired_at_unix) >= self.ttl_secs
    }
}

/// Process-wide mutex over update batches, backed by an exclusively
/// created file. A lock older than its TTL is considered abandoned.
#[derive(Debug, Clone)]
pub struct BatchLock {
    path: PathBuf,
    ttl_secs: u64,
}

impl BatchLock {
    pub fn new(path: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        Self {
            path: path.into(),
            ttl_secs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn acquire(&self, holder: &str) -> std::result::Result<BatchLockGuard, UpdateError> {
        let now = current_unix_timestamp()?;
        self.acquire_at(holder, now)
    }

    pub fn acquire_at(
        &self,
        holder: &str,
        now_unix: u64,
    ) -> std::result::Result<BatchLockGuard, UpdateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let record = LockRecord {
            holder: holder.to_string(),
            acquired_at_unix: now_unix,
            ttl_secs: self.ttl_secs,
        };

        if self.try_claim(&record)? {
            return Ok(self.guard(holder));
        }

        let existing = self.current_holder().ok().flatten();
        if !self.is_abandoned(existing.as_ref(), now_unix) {
            return Err(UpdateError::lock_conflict(
                existing.as_ref().map(|existing| existing.holder.as_str()),
            ));
        }

        let Some(_takeover) = self.claim_takeover(now_unix)? else {
            return Err(UpdateError::lock_conflict(
                existing.as_ref().map(|existing| existing.holder.as_str()),
            ));
        };

        // Another contender may have finished its own takeover between our
        // first read and claiming the marker.
        let current = self.current_holder().ok().flatten();
        if current != existing || !self.is_abandoned(current.as_ref(), now_unix) {
            return Err(UpdateError::lock_conflict(
                current.as_ref().map(|current| current.holder.as_str()),
            ));
        }

        tracing::warn!(
            lock = %self.path.display(),
            previous_holder = existing.as_ref().map(|e| e.holder.as_str()).unwrap_or("unknown"),
            "taking over abandoned batch lock"
        );
        remove_file_if_exists(&self.path)
            .with_context(|| format!("failed to remove stale lock {}", self.path.display()))?;
        if self.try_claim(&record)? {
            return Ok(self.guard(holder));
        }

        let winner = self.current_holder().ok().flatten();
        Err(UpdateError::lock_conflict(
            winner.as_ref().map(|winner| winner.holder.as_str()),
        ))
    }

    fn is_abandoned(&self, record: Option<&LockRecord>, now_unix: u64) -> bool {
        match record {
            Some(record) => record.is_expired(now_unix),
            None => path_age_secs(&self.path, now_unix)
                .map(|age| age >= self.ttl_secs)
                .unwrap_or(false),
        }
    }

    fn takeover_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".takeover");
        self.path.with_file_name(name)
    }

    /// Only the holder of the takeover marker may delete a stale lock. A
    /// marker older than the lock TTL was left by a crashed contender.
    fn claim_takeover(&self, now_unix: u64) -> Result<Option<TakeoverMarker>> {
        let path = self.takeover_path();
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Some(TakeoverMarker { path })),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    let stale = path_age_secs(&path, now_unix)
                        .map(|age| age >= self.ttl_secs)
                        .unwrap_or(false);
                    if !stale {
                        return Ok(None);
                    }
                    remove_file_if_exists(&path).with_context(|| {
                        format!("failed to remove stale takeover marker {}", path.display())
                    })?;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to claim takeover marker {}", path.display())
                    });
                }
            }
        }
        Ok(None)
    }

    pub fn current_holder(&self) -> Result<Option<LockRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read lock {}", self.path.display()));
            }
        };
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing lock {}", self.path.display()))?;
        Ok(Some(record))
    }

    fn try_claim(&self, record: &LockRecord) -> Result<bool> {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to claim lock {}", self.path.display()));
            }
        };

        let payload = serde_json::to_vec(record).context("failed serializing lock record")?;
        file.write_all(&payload)
            .and_then(|()| file.flush())
            .with_context(|| format!("failed to write lock {}", self.path.display()))?;
        Ok(true)
    }

    fn guard(&self, holder: &str) -> BatchLockGuard {
        tracing::debug!(lock = %self.path.display(), holder, "batch lock acquired");
        BatchLockGuard {
            lock: self.clone(),
            holder: holder.to_string(),
        }
    }
}

struct TakeoverMarker {
    path: PathBuf,
}

impl Drop for TakeoverMarker {
    fn drop(&mut self) {
        if let Err(err) = remove_file_if_exists(&self.path) {
            tracing::warn!(marker = %self.path.display(), error = %format!("{err:#}"), "failed to remove takeover marker");
        }
    }
}

/// Releases the batch lock on drop, unless someone else has since taken
/// it over.
#[derive(Debug)]
pub struct BatchLockGuard {
    lock: BatchLock,
    holder: String,
}

impl BatchLockGuard {
    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl Drop for BatchLockGuard {
    fn drop(&mut self) {
        match self.lock.current_holder() {
            Ok(Some(record)) if record.holder == self.holder => {
                if let Err(err) = remove_file_if_exists(&self.lock.path) {
                    tracing::warn!(lock = %self.lock.path.display(), error = %err, "failed to release batch lock");
                } else {
                    tracing::debug!(lock = %self.lock.path.display(), holder = %self.holder, "batch lock released");
                }
            }
            Ok(_) => {
                tracing::warn!(lock = %self.lock.path.display(), holder = %self.holder, "batch lock no longer held at release");
            }
            Err(err) => {
                tracing::warn!(lock = %self.lock.path.display(), error = %format!("{err:#}"), "failed to inspect batch lock at release");
            }
        }
    }
}
