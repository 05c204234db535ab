use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rollsafe_core::BatchResponse;
use rollsafe_security::sha256_hex;
use serde::{Deserialize, Serialize};

use crate::fs_utils::remove_file_if_exists;
use crate::HostLayout;

pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 900;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub stored_at_unix: u64,
    pub ttl_secs: u64,
    pub response: BatchResponse,
}

/// Stored batch responses keyed by a digest of the client's idempotency key.
#[derive(Debug, Clone)]
pub struct IdempotencyStore {
    layout: HostLayout,
    ttl_secs: u64,
}

impl IdempotencyStore {
    pub fn new(layout: &HostLayout, ttl_secs: u64) -> Self {
        Self {
            layout: layout.clone(),
            ttl_secs,
        }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.layout
            .idempotency_record_path(&sha256_hex(key.as_bytes()))
    }

    /// The stored response for `key` if it is still within its TTL.
    /// Expired or unreadable records are removed and ignored.
    pub fn lookup(&self, key: &str, now_unix: u64) -> Result<Option<BatchResponse>> {
        let path = self.record_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed reading idempotency record {}", path.display())
                });
            }
        };

        let record = match serde_json::from_str::<IdempotencyRecord>(&raw) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(record = %path.display(), error = %err, "discarding unreadable idempotency record");
                let _ = remove_file_if_exists(&path);
                return Ok(None);
            }
        };

        if now_unix.saturating_sub(record.stored_at_unix) >= record.ttl_secs {
            let _ = remove_file_if_exists(&path);
            return Ok(None);
        }
        Ok(Some(record.response))
    }

    pub fn store(&self, key: &str, response: &BatchResponse, now_unix: u64) -> Result<()> {
        let dir = self.layout.idempotency_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = self.record_path(key);
        let record = IdempotencyRecord {
            stored_at_unix: now_unix,
            ttl_secs: self.ttl_secs,
            response: response.clone(),
        };
        let content = serde_json::to_string(&record)
            .with_context(|| format!("failed serializing idempotency record {}", path.display()))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("failed writing idempotency record {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed committing idempotency record {}", path.display()))
    }
}
