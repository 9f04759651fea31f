//! Artifact verification: SHA-256 hash checks

use sdk::errors::CarrierError;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// Compute the SHA-256 hash of `data` and return hex string
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that the SHA-256 hash of `data` matches `expected_hex`.
///
/// Returns the computed hash on success.
pub fn verify_hash(plugin: &str, data: &[u8], expected_hex: &str) -> Result<String, CarrierError> {
    let computed = compute_hash(data);

    if !computed.eq_ignore_ascii_case(expected_hex.trim()) {
        return Err(CarrierError::IntegrityMismatch {
            plugin: plugin.to_string(),
            expected: expected_hex.to_string(),
            actual: computed,
        });
    }

    Ok(computed)
}

/// Stream-hash the file at `path`. `Ok(None)` when the file does not exist.
pub async fn hash_file(path: &Path) -> Result<Option<String>, CarrierError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Some(hex::encode(hasher.finalize())))
}

/// Whether a file hash matches the certified hash
pub fn hashes_match(actual: &str, certified: &str) -> bool {
    !certified.is_empty() && actual.eq_ignore_ascii_case(certified.trim())
}
