//! HKDF-based key derivation for deriving AEAD session keys from an
//! ECDH shared secret.

use hkdf::Hkdf;
use sha3::Sha3_256;

use crate::error::{CryptoError, Result};

/// Derive `output_len` bytes from `shared_secret`, bound to `info`.
pub fn derive_key(shared_secret: &[u8], info: &[u8], output_len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha3_256>::new(None, shared_secret);
    let mut output = vec![0u8; output_len];
    hk.expand(info, &mut output)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".into()))?;
    Ok(output)
}

/// Derive a 32-byte ChaCha20-Poly1305 session key from an X25519 shared
/// secret, domain-separated by the two participants' addresses so the
/// same ECDH product never yields the same key for a different pairing.
pub fn derive_session_key(shared_secret: &[u8; 32], sender: &[u8], recipient: &[u8]) -> Result<[u8; 32]> {
    let mut info = Vec::with_capacity(sender.len() + recipient.len() + 8);
    info.extend_from_slice(b"spxmesh-session");
    info.extend_from_slice(sender);
    info.extend_from_slice(recipient);
    let derived = derive_key(shared_secret, &info, 32)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&derived);
    Ok(key)
}
