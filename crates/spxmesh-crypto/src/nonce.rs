//! Nonce generation for AEAD operations.

use rand::{rngs::OsRng, RngCore};

/// Generate a fresh 96-bit nonce for ChaCha20-Poly1305.
pub fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
