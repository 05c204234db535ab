use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Accepts `sha256:`-prefixed and upper-case digests as published by
/// registries, returning the bare lower-case form.
pub fn normalize_sha256_hex(expected: &str) -> Result<String> {
    let trimmed = expected.trim();
    let bare = trimmed
        .strip_prefix("sha256:")
        .or_else(|| trimmed.strip_prefix("SHA256:"))
        .unwrap_or(trimmed)
        .to_ascii_lowercase();
    let decoded = hex::decode(&bare).context("failed to decode SHA-256 digest hex")?;
    if decoded.len() != 32 {
        return Err(anyhow!(
            "invalid SHA-256 digest length: expected 32 bytes, got {}",
            decoded.len()
        ));
    }
    Ok(bare)
}

/// Returns the actual digest alongside the verdict so callers can report it.
pub fn verify_sha256_file(path: &Path, expected: &str) -> Result<(bool, String)> {
    let expected = normalize_sha256_hex(expected)?;
    let actual = sha256_file(path)?;
    Ok((actual == expected, actual))
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn temp_file(contents: &[u8]) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time must be after epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "rollsafe-security-{}-{nanos}.bin",
            std::process::id()
        ));
        std::fs::write(&path, contents).expect("must write temp file");
        path
    }

    #[test]
    fn sha256_hex_matches_known_digest() {
        assert_eq!(sha256_hex(b"abc"), ABC_SHA256);
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn verify_sha256_file_accepts_prefixed_uppercase_digest() {
        let path = temp_file(b"abc");
        let expected = format!("sha256:{}", ABC_SHA256.to_ascii_uppercase());

        let (matched, actual) =
            verify_sha256_file(&path, &expected).expect("verification must complete");

        assert!(matched);
        assert_eq!(actual, ABC_SHA256);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn verify_sha256_file_reports_mismatch() {
        let path = temp_file(b"tampered");

        let (matched, actual) =
            verify_sha256_file(&path, ABC_SHA256).expect("verification must complete");

        assert!(!matched);
        assert_ne!(actual, ABC_SHA256);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn normalize_sha256_rejects_bad_hex_or_length() {
        assert!(normalize_sha256_hex("zz").is_err());
        assert!(normalize_sha256_hex("00").is_err());
    }

    #[test]
    fn sha256_file_errors_for_missing_file() {
        let missing = std::env::temp_dir().join("rollsafe-security-definitely-missing.bin");
        assert!(sha256_file(&missing).is_err());
    }
}
