//! Node configuration: a flat, serde-deserializable struct loaded from
//! an optional TOML file via the `config` crate and layered over
//! [`NodeConfig::default`]. Unlike a full multi-package aggregation
//! this only configures the things this crate itself owns: ports, the
//! data directory, the display name advertised in the VLAN overlay,
//! and the bootstrap peers to dial on startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Reliable-UDP port for messaging, discovery gossip, and DHT traffic.
    pub udp_port: u16,
    /// Length-prefixed TCP port for bulk file transfer.
    pub tcp_port: u16,
    /// LAN broadcast/multicast discovery port.
    pub discovery_port: u16,
    /// Whether to run the application-level virtual LAN overlay.
    pub vlan_enabled: bool,
    /// Directory for share-index metadata and downloaded files.
    pub data_dir: PathBuf,
    /// Display name advertised to VLAN peers; falls back to the
    /// shareable address if unset.
    pub display_name: Option<String>,
    /// Capability strings advertised alongside the VLAN announcement
    /// (e.g. which games this node can relay discovery traffic for).
    pub vlan_capabilities: Vec<String>,
    /// Endpoints dialed once at startup, best-effort.
    pub bootstrap_peers: Vec<SocketAddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            udp_port: 45678,
            tcp_port: 45679,
            discovery_port: 45678,
            vlan_enabled: true,
            data_dir: PathBuf::from("./spxmesh-data"),
            display_name: None,
            vlan_capabilities: Vec::new(),
            bootstrap_peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Load from `path` if it exists, falling back to
    /// [`NodeConfig::default`] for anything the file doesn't set.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&NodeConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_match_wire_spec() {
        let config = NodeConfig::default();
        assert_eq!(config.udp_port, 45678);
        assert_eq!(config.tcp_port, 45679);
        assert_eq!(config.discovery_port, 45678);
    }

    #[test]
    fn load_with_no_file_returns_defaults() {
        let config = NodeConfig::load(None).unwrap();
        assert_eq!(config.udp_port, 45678);
        assert!(config.bootstrap_peers.is_empty());
    }
}
