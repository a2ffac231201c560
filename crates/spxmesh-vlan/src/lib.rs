//! Application-level virtual LAN overlay. Every mesh peer is assigned a
//! deterministic `10.147.*.*` address; local UDP broadcasts on common
//! game-discovery ports are relayed to every VLAN peer and replayed as
//! local broadcasts on the far side, so unmodified LAN games see
//! players connected only through the mesh.

pub mod error;
pub mod events;
pub mod peer;
pub mod service;
pub mod virtual_ip;

pub use error::{Result, VLanError};
pub use events::VLanEvent;
pub use peer::VLanPeer;
pub use service::{VLanService, GAME_DISCOVERY_PORTS, VLAN_ANNOUNCE_PORT, VLAN_BROADCAST_PORT};
pub use virtual_ip::virtual_ip_for;
