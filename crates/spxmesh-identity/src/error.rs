#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("address is missing the spx1 prefix")]
    InvalidAddressPrefix,

    #[error("address is not valid base58")]
    InvalidAddressEncoding,

    #[error("address has the wrong decoded length: expected {expected}, got {actual}")]
    InvalidAddressLength { expected: usize, actual: usize },

    #[error("address checksum does not match")]
    InvalidAddressChecksum,
}

pub type Result<T> = std::result::Result<T, IdentityError>;
