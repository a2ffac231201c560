//! Connection fabric: a custom reliable-UDP protocol with handshake,
//! retry, ping/pong, and NAT hole punching, plus length-prefixed TCP
//! for bulk transfer. Both emit the same `TransportEvent` stream.

pub mod connection;
pub mod delivery;
pub mod error;
pub mod events;
pub mod reliable_udp;
pub mod tcp;
pub mod transport;

pub use connection::{Connection, TransportKind};
pub use delivery::DeliveryMode;
pub use error::{Result, TransportError};
pub use events::TransportEvent;
pub use reliable_udp::ReliableUdpTransport;
pub use tcp::TcpTransport;
pub use transport::Transport;
