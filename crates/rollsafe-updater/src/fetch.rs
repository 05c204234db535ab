use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rollsafe_core::{UpdateCandidate, UpdateError};
use rollsafe_security::verify_sha256_file;

use crate::fs_utils::remove_file_if_exists;

pub const DEFAULT_MIN_PACKAGE_BYTES: u64 = 32 * 1024;
pub const DEFAULT_FETCH_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Moves a package from wherever it is published to a local file.
pub trait PackageTransport: Send + Sync {
    /// Write the package named by `reference` to `dest`, returning the
    /// number of bytes written. `dest` must exist and be non-empty on success.
    fn fetch(&self, reference: &str, dest: &Path, timeout: Duration) -> Result<u64>;
}

/// `http(s)://` URLs through reqwest, `file://` URLs and plain paths
/// through the filesystem.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    retries: u32,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            retries: DEFAULT_FETCH_RETRIES,
        }
    }
}

impl HttpTransport {
    pub fn new(retries: u32) -> Self {
        Self { retries }
    }

    fn fetch_http(&self, url: &str, part_path: &Path, timeout: Duration) -> Result<u64> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("failed to build download client")?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match download_once(&client, url, part_path) {
                Ok(written) => return Ok(written),
                Err(DownloadFailure::Permanent(err)) => return Err(err),
                Err(DownloadFailure::Transient(err)) if attempt > self.retries => {
                    return Err(err.context(format!("download failed after {attempt} attempts")));
                }
                Err(DownloadFailure::Transient(err)) => {
                    tracing::warn!(url, attempt, error = %format!("{err:#}"), "retrying download");
                    thread::sleep(RETRY_BACKOFF * attempt);
                }
            }
        }
    }
}

enum DownloadFailure {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

fn download_once(
    client: &reqwest::blocking::Client,
    url: &str,
    part_path: &Path,
) -> std::result::Result<u64, DownloadFailure> {
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("request failed: {url}"))
        .map_err(DownloadFailure::Transient)?;

    let status = response.status();
    if status.is_server_error() {
        return Err(DownloadFailure::Transient(anyhow!(
            "server returned HTTP {} for {url}",
            status.as_u16()
        )));
    }
    if !status.is_success() {
        return Err(DownloadFailure::Permanent(anyhow!(
            "server returned HTTP {} for {url}",
            status.as_u16()
        )));
    }

    let mut file = fs::File::create(part_path)
        .with_context(|| format!("failed to create {}", part_path.display()))
        .map_err(DownloadFailure::Permanent)?;
    let written = response
        .copy_to(&mut file)
        .with_context(|| format!("failed streaming response body from {url}"))
        .map_err(DownloadFailure::Transient)?;
    file.flush()
        .with_context(|| format!("failed to flush {}", part_path.display()))
        .map_err(DownloadFailure::Permanent)?;
    Ok(written)
}

fn local_source_path(reference: &str) -> Option<PathBuf> {
    if let Some(path) = reference.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if reference.contains("://") {
        return None;
    }
    Some(PathBuf::from(reference))
}

impl PackageTransport for HttpTransport {
    fn fetch(&self, reference: &str, dest: &Path, timeout: Duration) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut part_path = dest.as_os_str().to_owned();
        part_path.push(".part");
        let part_path = PathBuf::from(part_path);
        remove_file_if_exists(&part_path)
            .with_context(|| format!("failed to clear {}", part_path.display()))?;

        let result = if reference.starts_with("http://") || reference.starts_with("https://") {
            self.fetch_http(reference, &part_path, timeout)
        } else if let Some(source) = local_source_path(reference) {
            fs::copy(&source, &part_path)
                .with_context(|| format!("failed to read package {}", source.display()))
        } else {
            Err(anyhow!("unsupported package reference: {reference}"))
        };

        let written = match result {
            Ok(written) => written,
            Err(err) => {
                let _ = remove_file_if_exists(&part_path);
                return Err(err);
            }
        };
        if written == 0 {
            let _ = remove_file_if_exists(&part_path);
            return Err(anyhow!("package is empty: {reference}"));
        }

        fs::rename(&part_path, dest)
            .with_context(|| format!("failed to move download into {}", dest.display()))?;
        Ok(written)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub min_package_bytes: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            min_package_bytes: DEFAULT_MIN_PACKAGE_BYTES,
        }
    }
}

/// Fetch the candidate's package and reject it if it is implausibly small
/// or does not match its published digest.
pub fn fetch_package(
    transport: &dyn PackageTransport,
    candidate: &UpdateCandidate,
    dest: &Path,
    options: FetchOptions,
) -> std::result::Result<u64, UpdateError> {
    let written = transport
        .fetch(&candidate.package_reference, dest, options.timeout)
        .map_err(UpdateError::download)?;

    let size = fs::metadata(dest)
        .with_context(|| format!("failed to stat downloaded package {}", dest.display()))
        .map_err(UpdateError::download)?
        .len();
    if size < options.min_package_bytes {
        return Err(UpdateError::TooSmallPackage {
            path: dest.display().to_string(),
            size,
            minimum: options.min_package_bytes,
        });
    }

    if let Some(expected) = &candidate.sha256 {
        let (matched, actual) =
            verify_sha256_file(dest, expected).map_err(UpdateError::download)?;
        if !matched {
            return Err(UpdateError::ChecksumMismatch {
                expected: expected.clone(),
                actual,
            });
        }
    }

    Ok(written)
}
