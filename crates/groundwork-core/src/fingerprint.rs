//! Content fingerprints and stable chunk ids.
//!
//! A fingerprint is the SHA-256 of the chunk text after whitespace
//! collapsing and lowercasing, so cosmetic re-flows of the same text map to
//! the same hash. Chunk ids are UUIDv5 values derived from the source id
//! and the fingerprint, which keeps them stable across re-ingestion of
//! unchanged content.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Collapse whitespace runs to single spaces, trim, and lowercase.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 over the normalized UTF-8 bytes of `text`.
///
/// # Example
///
/// ```rust
/// use groundwork_core::fingerprint::fingerprint;
///
/// assert_eq!(fingerprint("ML is  AI subset"), fingerprint("ml is ai\nsubset"));
/// assert_eq!(fingerprint("x").len(), 64);
/// ```
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic chunk id for `(source_id, content_hash)`.
pub fn chunk_id(source_id: &str, content_hash: &str) -> String {
    let name = format!("{}\u{1f}{}", source_id, content_hash);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace_and_case() {
        assert_eq!(normalize("  Hello\t\tWORLD \n again "), "hello world again");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = fingerprint("Machine learning is a subset of AI.");
        let b = fingerprint("Machine learning is a subset of AI.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_detects_drift() {
        assert_ne!(fingerprint("ML is AI subset"), fingerprint("ML is an AI subset"));
    }

    #[test]
    fn test_chunk_id_stable_and_source_scoped() {
        let hash = fingerprint("same text");
        assert_eq!(chunk_id("doc1", &hash), chunk_id("doc1", &hash));
        assert_ne!(chunk_id("doc1", &hash), chunk_id("doc2", &hash));
    }
}
