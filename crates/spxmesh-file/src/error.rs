#[derive(thiserror::Error, Debug)]
pub enum FileError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("peer error: {0}")]
    Peer(#[from] spxmesh_peer::PeerError),

    #[error("file {0:?} not found")]
    FileNotFound([u8; 32]),

    #[error("no providers available for {0:?}")]
    NoProviders([u8; 32]),

    #[error("chunk hash mismatch for {file_hash:?} chunk {chunk_index}")]
    ChunkHashMismatch { file_hash: [u8; 32], chunk_index: u32 },

    #[error("chunk request timed out")]
    ChunkTimeout,

    #[error("download {0:?} not found")]
    DownloadNotFound([u8; 32]),
}

pub type Result<T> = std::result::Result<T, FileError>;
