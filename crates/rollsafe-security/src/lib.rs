mod checksum;

pub use checksum::{normalize_sha256_hex, sha256_file, sha256_hex, verify_sha256_file};
