mod backup;
mod fetch;
mod fs_utils;
mod health;
mod host;
mod idempotency;
mod janitor;
mod layout;
mod lock;
mod orchestrator;
mod preflight;
mod swap;
mod unpack;
mod workspace;

pub use backup::{Backup, BackupManager, PruneReport};
pub use fetch::{
    fetch_package, FetchOptions, HttpTransport, PackageTransport, DEFAULT_FETCH_RETRIES,
    DEFAULT_MIN_PACKAGE_BYTES,
};
pub use fs_utils::{copy_dir_recursive, current_unix_timestamp};
pub use health::{HealthProbe, HealthStatus, HttpHealthProbe};
pub use host::{ComponentHost, FilesystemHost};
pub use idempotency::{IdempotencyRecord, IdempotencyStore, DEFAULT_IDEMPOTENCY_TTL_SECS};
pub use janitor::Janitor;
pub use layout::HostLayout;
pub use lock::{BatchLock, BatchLockGuard, LockRecord, DEFAULT_LOCK_TTL_SECS};
pub use orchestrator::{BackupRetention, Orchestrator, ProgressEvent, UpdateOptions};
pub use preflight::{free_space_for, preflight, preflight_with_probe, DEFAULT_MIN_FREE_BYTES};
pub use swap::{FsSwapExecutor, SwapExecutor, SwapMethod};
pub use unpack::{detect_archive_type, external_decoders, unpack};
pub use workspace::Workspace;
