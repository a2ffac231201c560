//! Error kinds surfaced by the crypto layer.
//!
//! Cryptographic failures are never retried by callers (see the peer
//! manager's handshake pipeline); they are terminal for the operation
//! that produced them.

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("malformed envelope")]
    MalformedEnvelope,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("sender address does not match derived address")]
    AddressMismatch,

    #[error("AEAD decryption failed")]
    DecryptionFailed,

    #[error("AEAD encryption failed")]
    EncryptionFailed,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
