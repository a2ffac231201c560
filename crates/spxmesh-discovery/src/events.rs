use std::net::SocketAddr;
use spxmesh_identity::Address;

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PeerDiscovered {
        address: Address,
        endpoint: SocketAddr,
    },
    PeerLost {
        address: Address,
    },
}
