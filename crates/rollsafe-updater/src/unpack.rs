use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use rollsafe_core::{ArchiveType, UpdateError};

const SNIFF_LEN: usize = 512;
const IGNORED_TOP_LEVEL: &[&str] = &["__MACOSX"];

/// Extract `archive_path` into `dest_dir` and return the directory that
/// holds the component tree: the single top-level directory when the
/// archive wraps everything in one, otherwise `dest_dir` itself.
pub fn unpack(archive_path: &Path, dest_dir: &Path) -> std::result::Result<PathBuf, UpdateError> {
    extract_archive(archive_path, dest_dir)
        .and_then(|()| find_payload_root(dest_dir))
        .map_err(UpdateError::unzip)
}

pub fn detect_archive_type(archive_path: &Path) -> Result<Option<ArchiveType>> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("failed to open archive {}", archive_path.display()))?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut header)
        .with_context(|| format!("failed to read archive header {}", archive_path.display()))?;
    Ok(ArchiveType::sniff(&header))
}

fn extract_archive(archive_path: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    match detect_archive_type(archive_path)? {
        Some(ArchiveType::Zip) => extract_zip(archive_path, dst),
        Some(ArchiveType::TarGz) => extract_tar_gz(archive_path, dst),
        Some(ArchiveType::Tar) => extract_tar(archive_path, dst),
        None => extract_with_external_tar(archive_path, dst),
    }
}

fn extract_zip(archive_path: &Path, dst: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("failed to open zip archive {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("failed to read zip archive {}", archive_path.display()))?;
    archive
        .extract(dst)
        .with_context(|| format!("failed to extract zip archive {}", archive_path.display()))
}

fn extract_tar_gz(archive_path: &Path, dst: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("failed to open tar.gz archive {}", archive_path.display()))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(dst)
        .with_context(|| format!("failed to extract tar.gz archive {}", archive_path.display()))
}

fn extract_tar(archive_path: &Path, dst: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("failed to open tar archive {}", archive_path.display()))?;
    tar::Archive::new(file)
        .unpack(dst)
        .with_context(|| format!("failed to extract tar archive {}", archive_path.display()))
}

/// Last resort for formats the built-in decoders do not recognise.
fn extract_with_external_tar(archive_path: &Path, dst: &Path) -> Result<()> {
    let tar = which::which("tar").map_err(|_| {
        anyhow!(
            "unrecognised archive format and no external tar available: {}",
            archive_path.display()
        )
    })?;
    tracing::debug!(archive = %archive_path.display(), "falling back to external tar");
    run_command(
        Command::new(tar)
            .arg("-xf")
            .arg(archive_path)
            .arg("-C")
            .arg(dst),
        "failed to extract archive with external tar",
    )
}

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

pub(crate) fn find_payload_root(extracted: &Path) -> Result<PathBuf> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(extracted)
        .with_context(|| format!("failed to read {}", extracted.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        if IGNORED_TOP_LEVEL
            .iter()
            .any(|ignored| name.to_string_lossy() == *ignored)
        {
            continue;
        }
        entries.push(entry);
    }

    if entries.is_empty() {
        return Err(anyhow!("archive extracted to nothing"));
    }
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        return Ok(entries[0].path());
    }
    Ok(extracted.to_path_buf())
}

/// External decoders the unpacker can fall back to on this machine.
pub fn external_decoders() -> Vec<String> {
    ["tar"]
        .iter()
        .filter(|tool| which::which(tool).is_ok())
        .map(|tool| tool.to_string())
        .collect()
}
