use std::net::SocketAddr;
use uuid::Uuid;

/// Lifecycle and data events a transport emits on its event channel.
/// The peer manager consumes these from every registered transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ConnectionReceived {
        connection_id: Uuid,
        remote_endpoint: SocketAddr,
    },
    ConnectionLost {
        connection_id: Uuid,
    },
    DataReceived {
        connection_id: Uuid,
        bytes: Vec<u8>,
    },
    Disconnected {
        connection_id: Uuid,
    },
}
