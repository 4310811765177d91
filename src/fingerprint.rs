//! SHA-256 fingerprinting of canonical schema bytes. Shared by every parser so
//! that the fingerprint algorithm itself never drifts between formats.

use sha2::{Digest, Sha256};

pub fn fingerprint(canonical_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_same_fingerprint() {
        assert_eq!(fingerprint(b"hello"), fingerprint(b"hello"));
    }

    #[test]
    fn different_bytes_different_fingerprint() {
        assert_ne!(fingerprint(b"hello"), fingerprint(b"world"));
    }
}
