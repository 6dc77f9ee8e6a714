//! Cache key normalization and content-addressed digests.

use sha2::{Digest, Sha256};

/// Normalize a URL into its cache key: surrounding whitespace and any
/// trailing slash are removed so `http://a/` and `http://a` share an entry.
pub fn normalize(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Filesystem- and key-safe SHA-256 hex digest of `key`.
pub fn digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest over several parts, separated so that
/// `["ab", "c"]` and `["a", "bc"]` differ.
pub fn digest_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
