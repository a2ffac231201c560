#[derive(thiserror::Error, Debug)]
pub enum VLanError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer error: {0}")]
    Peer(#[from] spxmesh_peer::PeerError),
}

pub type Result<T> = std::result::Result<T, VLanError>;
