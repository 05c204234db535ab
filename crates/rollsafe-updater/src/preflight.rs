use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rollsafe_core::{DirStatus, PreflightReport};

use crate::unpack::external_decoders;
use crate::HostLayout;

pub const DEFAULT_MIN_FREE_BYTES: u64 = 50 * 1024 * 1024;

pub fn preflight(layout: &HostLayout, min_free_bytes: u64) -> PreflightReport {
    preflight_with_probe(layout, min_free_bytes, free_space_for)
}

/// Check that an update could run at all: decoders present, every working
/// directory writable, and enough free space on the host volume. Unknown
/// free space is reported but does not fail the check.
pub fn preflight_with_probe<F>(
    layout: &HostLayout,
    min_free_bytes: u64,
    free_space: F,
) -> PreflightReport
where
    F: Fn(&Path) -> Option<u64>,
{
    let mut why = Vec::new();
    let mut dirs = IndexMap::new();
    for (label, path) in [
        ("scratch", layout.scratch_dir()),
        ("rollback", layout.rollback_dir()),
        ("backups", layout.backups_dir()),
        ("components", layout.components_dir().to_path_buf()),
    ] {
        let status = probe_dir(&path);
        if !status.writable {
            why.push(format!("Directory not writable: {label} ({})", path.display()));
        }
        dirs.insert(label.to_string(), status);
    }

    let free_bytes = free_space(layout.root());
    if let Some(free) = free_bytes {
        if free < min_free_bytes {
            why.push(format!(
                "Low disk space: {free} bytes free, need at least {min_free_bytes}"
            ));
        }
    }

    PreflightReport {
        ok: why.is_empty(),
        why,
        dirs,
        zip: true,
        transport: true,
        external_decoders: external_decoders(),
        free_bytes,
        min_free_bytes,
    }
}

fn probe_dir(path: &Path) -> DirStatus {
    let _ = fs::create_dir_all(path);
    let exists = path.is_dir();
    let probe = path.join(format!(".rollsafe-probe-{}", std::process::id()));
    let writable = exists && fs::write(&probe, b"probe").is_ok();
    if writable {
        let _ = fs::remove_file(&probe);
    }
    DirStatus {
        path: path.to_path_buf(),
        exists,
        writable,
    }
}

/// Available bytes on the mounted volume holding `path`.
pub fn free_space_for(path: &Path) -> Option<u64> {
    let target: PathBuf = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}
