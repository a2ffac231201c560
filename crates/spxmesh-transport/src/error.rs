#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire framing error: {0}")]
    Frame(#[from] spxmesh_protocol::ProtocolError),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("connection {0} is closed")]
    ConnectionClosed(uuid::Uuid),

    #[error("no connection to {0}")]
    NoSuchConnection(uuid::Uuid),

    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport not started")]
    NotStarted,
}

pub type Result<T> = std::result::Result<T, TransportError>;
