//! Checksums for migration scripts
//!
//! SHA-256 over the serialized forward script, hex-encoded. Recorded at
//! apply time and re-verified before rollback to detect history tampering.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 checksum of a script, hex-encoded
pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_fixed_length() {
        assert_eq!(compute_checksum("CREATE TABLE t (id INTEGER)").len(), 64);
    }

    #[test]
    fn test_checksum_deterministic() {
        let content = r#"[{"AddColumn":{"table":"authors"}}]"#;
        assert_eq!(compute_checksum(content), compute_checksum(content));
    }

    #[test]
    fn test_checksum_sensitive_to_content() {
        assert_ne!(compute_checksum("a"), compute_checksum("b"));
    }
}
