//! Helpers that keep full filesystem paths out of logs and span fields.

use std::path::Path;

/// Returns only the final component of a path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Short, stable fingerprint of a path, so two log lines about the same
/// directory can be correlated without printing it.
pub fn hash_path(path: &Path) -> String {
    let digest = blake3::hash(path.to_string_lossy().as_bytes());
    digest.to_hex()[..16].to_string()
}
