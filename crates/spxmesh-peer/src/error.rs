use std::net::SocketAddr;

use spxmesh_identity::Address;
use spxmesh_transport::TransportKind;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {
    #[error("peer {0:?} not found")]
    PeerNotFound(Address),

    #[error("peer {0:?} is blocked")]
    Blocked(Address),

    #[error("peer {0:?} has no connected transport")]
    NoConnection(Address),

    #[error("no transport registered for {0:?}")]
    UnknownTransport(TransportKind),

    #[error("transport error: {0}")]
    Transport(#[from] spxmesh_transport::TransportError),

    #[error("crypto error: {0}")]
    Crypto(#[from] spxmesh_crypto::CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("handshake with {0} timed out")]
    HandshakeTimeout(SocketAddr),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("message dropped: outside the replay window")]
    ReplayOrStale,
}

pub type Result<T> = std::result::Result<T, PeerError>;
