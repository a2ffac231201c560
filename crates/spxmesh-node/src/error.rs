#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(#[from] spxmesh_transport::TransportError),

    #[error("peer error: {0}")]
    Peer(#[from] spxmesh_peer::PeerError),

    #[error("file engine error: {0}")]
    File(#[from] spxmesh_file::FileError),

    #[error("vlan error: {0}")]
    VLan(#[from] spxmesh_vlan::VLanError),

    #[error("discovery error: {0}")]
    Discovery(#[from] spxmesh_discovery::DiscoveryError),

    #[error("identity error: {0}")]
    Identity(#[from] spxmesh_identity::IdentityError),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid shareable address {0:?}: {1}")]
    InvalidShareableAddress(String, &'static str),

    #[error("peer {0} not found in routing table")]
    PeerUnreachable(spxmesh_identity::Address),

    #[error("node is already started")]
    AlreadyStarted,

    #[error("node is not started")]
    NotStarted,
}

pub type Result<T> = std::result::Result<T, NodeError>;
