//! Wire-level parse errors, plus the protocol `Error` message's numeric
//! codes (§6 of the data model).

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame is truncated")]
    Truncated,

    #[error("bad magic number")]
    BadMagic,

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("declared length {declared} does not match frame size (actual {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("CRC32 mismatch")]
    CrcMismatch,

    #[error("unknown packet type byte {0}")]
    UnknownPacketType(u8),

    #[error("invalid TCP frame length {0}, must be in (0, 100 MiB]")]
    InvalidFrameLength(usize),
}

/// Numeric error codes carried on a protocol `Error` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0,
    InvalidVersion = 1,
    InvalidSignature = 2,
    DecryptionFailed = 3,
    Timeout = 4,
    NotAuthorized = 5,
    PeerNotFound = 6,
    RateLimited = 7,
    TransferFailed = 8,
    CallFailed = 9,
    InvalidMessage = 10,
}
