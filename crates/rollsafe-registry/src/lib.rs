mod cache;
mod index;
mod release;
mod source;

pub use cache::{AvailableUpdateCache, CacheEntry, CachedRelease};
pub use index::{ConfiguredRegistry, FilesystemRegistry, HttpRegistry, ReleaseSource};
pub use release::ReleaseManifest;
pub use source::{validate_source_name, validate_sources, RegistrySourceConfig, RegistrySourceKind};
