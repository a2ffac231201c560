//! Hashing helpers. BLAKE3 is used for identity derivation and checksums
//! (matching the rest of the mesh's internal hashing); SHA-256 is used for
//! file and chunk integrity since the data model requires it explicitly.

/// BLAKE3 of `data`, as a 32-byte digest.
pub fn blake3_32(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

/// SHA-256 of `data`, as a 32-byte digest.
pub fn sha256_32(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake3_is_deterministic() {
        assert_eq!(blake3_32(b"hello"), blake3_32(b"hello"));
        assert_ne!(blake3_32(b"hello"), blake3_32(b"world"));
    }

    #[test]
    fn sha256_matches_known_vector() {
        // SHA-256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85
        let digest = sha256_32(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }
}
