//! Wire formats shared by every transport: the outer UDP envelope frame,
//! reliable-UDP packet types, TCP length-prefixed framing, and the typed
//! application message union.

pub mod error;
pub mod message;
pub mod permissions;
pub mod tcp_framing;
pub mod udp_packet;
pub mod wire;

pub use error::{ErrorCode, ProtocolError};
pub use message::{CatalogFileEntry, DhtNodeInfo, MessageBody, ProtocolMessage, VLanPacketType};
pub use permissions::{PermissionKind, Permissions};
pub use udp_packet::{UdpPacket, UdpPacketType};
pub use wire::{Flags, WireFrame};
