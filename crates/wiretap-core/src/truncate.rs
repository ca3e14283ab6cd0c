//! Payload bounding.
//!
//! Large bodies and frames are cut to a configured byte limit before they
//! are persisted. When a cut happens the record keeps the original size and
//! a SHA-256 digest of the full payload so the loss is auditable.

use sha2::{Digest, Sha256};

/// Result of [`truncate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated<'a> {
    /// The (possibly shortened) payload.
    pub data: &'a [u8],
    /// Whether bytes were removed.
    pub truncated: bool,
    /// Length of the payload before truncation.
    pub original_size: usize,
    /// Hex SHA-256 of the full payload, only present when truncated.
    pub sha256: Option<String>,
}

/// Bound `data` to at most `max_bytes`.
///
/// A limit of `0` disables truncation.
pub fn truncate(data: &[u8], max_bytes: usize) -> Truncated<'_> {
    let original_size = data.len();
    if max_bytes == 0 || original_size <= max_bytes {
        return Truncated {
            data,
            truncated: false,
            original_size,
            sha256: None,
        };
    }
    Truncated {
        data: &data[..max_bytes],
        truncated: true,
        original_size,
        sha256: Some(sha256_hex(data)),
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payload_untouched() {
        let out = truncate(b"hello", 10);
        assert_eq!(out.data, b"hello");
        assert!(!out.truncated);
        assert_eq!(out.original_size, 5);
        assert!(out.sha256.is_none());
    }

    #[test]
    fn exact_limit_untouched() {
        let out = truncate(b"hello", 5);
        assert_eq!(out.data, b"hello");
        assert!(!out.truncated);
    }

    #[test]
    fn long_payload_cut_with_digest() {
        let out = truncate(b"hello world", 5);
        assert_eq!(out.data, b"hello");
        assert!(out.truncated);
        assert_eq!(out.original_size, 11);
        assert_eq!(
            out.sha256.as_deref(),
            Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
    }

    #[test]
    fn zero_limit_means_unbounded() {
        let data = vec![7u8; 4096];
        let out = truncate(&data, 0);
        assert_eq!(out.data.len(), 4096);
        assert!(!out.truncated);
    }

    #[test]
    fn empty_payload() {
        let out = truncate(b"", 3);
        assert!(out.data.is_empty());
        assert!(!out.truncated);
        assert_eq!(out.original_size, 0);
    }

    #[test]
    fn digest_covers_full_payload_not_prefix() {
        let out = truncate(b"abcdef", 3);
        assert_eq!(out.sha256.unwrap(), sha256_hex(b"abcdef"));
        assert_ne!(sha256_hex(b"abcdef"), sha256_hex(b"abc"));
    }
}
