use spxmesh_identity::Address;

#[derive(Debug, Clone)]
pub enum VLanEvent {
    PeerJoined { peer: Address, virtual_ip: [u8; 4] },
    PeerLeft { peer: Address },
    /// A second, distinct address announced the same virtual IP already
    /// owned by `existing`. Both peers are still tracked by address;
    /// this is surfaced so the application can decide whether to warn.
    VirtualIpCollision {
        virtual_ip: [u8; 4],
        existing: Address,
        incoming: Address,
    },
    TrafficReceived {
        source_ip: [u8; 4],
        source_port: u16,
        destination_port: u16,
        data: Vec<u8>,
    },
}
