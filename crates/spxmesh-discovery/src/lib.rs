//! UDP broadcast and multicast LAN peer discovery.

pub mod error;
pub mod events;
pub mod message;
pub mod service;

pub use error::{DiscoveryError, Result};
pub use events::DiscoveryEvent;
pub use message::DiscoveryMessage;
pub use service::{LanDiscovery, DEFAULT_DISCOVERY_PORT};
