use std::time::Instant;

use spxmesh_identity::Address;

/// One peer known to have joined the overlay.
#[derive(Debug, Clone)]
pub struct VLanPeer {
    pub address: Address,
    pub virtual_ip: [u8; 4],
    pub hostname: String,
    pub capabilities: Vec<String>,
    pub joined_at: Instant,
}
