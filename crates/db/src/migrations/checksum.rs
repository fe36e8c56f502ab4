//! Content checksums for migration files

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_whitespace_changes_digest() {
        assert_ne!(checksum(b"SELECT 1;"), checksum(b"SELECT 1;\n"));
    }
}
