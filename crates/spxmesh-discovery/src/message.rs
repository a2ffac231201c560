use serde::{Deserialize, Serialize};
use spxmesh_identity::Address;

/// Broadcast/multicast announcement or search, JSON on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryMessage {
    Announcement {
        address: Address,
        service_port: u16,
        is_leaving: bool,
        timestamp: u64,
    },
    Search {
        requester: Address,
        port: u16,
        timestamp: u64,
    },
}

pub fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
