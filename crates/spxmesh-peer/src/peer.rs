use std::net::SocketAddr;
use std::time::Instant;

use spxmesh_identity::Address;
use spxmesh_protocol::Permissions;
use spxmesh_transport::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Discovered,
    Connecting,
    Connected,
    Authenticated,
    Authorized,
    Blocked,
    Disconnected,
}

/// One remote node as known to this process. Created on first discovery
/// or inbound handshake; removed only on explicit `forget`.
#[derive(Clone)]
pub struct Peer {
    pub address: Address,
    pub public_key: Option<[u8; 32]>,
    pub display_name: Option<String>,
    pub status: PeerStatus,
    pub permissions: Permissions,
    pub connections: Vec<Connection>,
    pub known_endpoints: Vec<SocketAddr>,
    pub last_seen: Instant,
    pub last_latency_ms: Option<u32>,
}

impl Peer {
    pub fn new(address: Address) -> Self {
        Peer {
            address,
            public_key: None,
            display_name: None,
            status: PeerStatus::Discovered,
            permissions: Permissions::NONE,
            connections: Vec::new(),
            known_endpoints: Vec::new(),
            last_seen: Instant::now(),
            last_latency_ms: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn add_connection(&mut self, connection: Connection) {
        if !self.connections.iter().any(|c| c.id() == connection.id()) {
            if !self.known_endpoints.contains(&connection.remote_endpoint()) {
                self.known_endpoints.push(connection.remote_endpoint());
            }
            self.connections.push(connection);
        }
    }

    pub fn remove_connection(&mut self, connection_id: uuid::Uuid) {
        self.connections.retain(|c| c.id() != connection_id);
    }

    /// The lowest-latency connected transport, used for outgoing sends.
    pub fn best_connection(&self) -> Option<&Connection> {
        self.connections
            .iter()
            .filter(|c| c.is_connected())
            .min_by_key(|c| c.latency_ms())
    }

    pub fn is_connected(&self) -> bool {
        self.connections.iter().any(|c| c.is_connected())
    }
}
