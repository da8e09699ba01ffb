//! Digest-based change detection.
//!
//! A resource's digest is the hex SHA-256 of the JSON envelope
//! `{"data": <normalized resolved data>, "revision": N}`. The envelope is
//! serialized with sorted object keys, so the digest is invariant under
//! map-key reordering and under YAML decodings that normalize to the same
//! value tree. `revision` lets an author force a re-apply without
//! touching `data`.

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

/// Clamps a declared revision to the unsigned value that participates in
/// the digest. The linter rejects negative revisions before apply; the
/// clamp keeps the digest total anyway.
#[must_use]
pub fn revision_for_digest(revision: i64) -> u64 {
    u64::try_from(revision).unwrap_or(0)
}

/// Computes the hex SHA-256 digest of the envelope
/// `{"data": data, "revision": revision}`.
#[must_use]
pub fn data_digest(data: &JsonValue, revision: u64) -> String {
    let envelope = serde_json::json!({
        "data": data,
        "revision": revision,
    });
    let Ok(bytes) = serde_json::to_vec(&envelope) else {
        return String::new();
    };
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::normalize::normalize_value;

    #[test]
    fn test_digest_is_stable_under_key_reordering() {
        let a = json!({"b": 2, "a": 1, "nested": {"y": true, "x": [1, 2]}});
        let b = json!({"nested": {"x": [1, 2], "y": true}, "a": 1, "b": 2});
        assert_eq!(data_digest(&a, 0), data_digest(&b, 0));
    }

    #[test]
    fn test_digest_is_stable_across_yaml_decodings() {
        // A string-keyed mapping and a mapping that needed key coercion
        // normalize to the same shape and therefore the same digest.
        let plain: serde_yaml::Value = serde_yaml::from_str("ttl: 300").unwrap();
        let quoted: serde_yaml::Value = serde_yaml::from_str("\"ttl\": 300").unwrap();
        assert_eq!(
            data_digest(&normalize_value(&plain), 0),
            data_digest(&normalize_value(&quoted), 0),
        );
    }

    #[test]
    fn test_revision_changes_digest() {
        let data = json!({"policies": ["default"]});
        assert_ne!(data_digest(&data, 0), data_digest(&data, 1));
    }

    #[test]
    fn test_negative_revision_clamps_to_zero() {
        assert_eq!(revision_for_digest(-5), 0);
        assert_eq!(revision_for_digest(0), 0);
        assert_eq!(revision_for_digest(7), 7);
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let digest = data_digest(&json!({}), 0);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
