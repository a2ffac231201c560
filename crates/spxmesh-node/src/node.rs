//! The node orchestrator: wires every subsystem into one running
//! process and exposes the small surface a host application drives
//! (connect, chat, permissions, file sharing, the VLAN overlay) behind
//! a single merged event stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use spxmesh_crypto::KeyPair;
use spxmesh_discovery::{DiscoveryEvent, LanDiscovery};
use spxmesh_dht::RoutingTable;
use spxmesh_file::{FileEngine, FileEvent};
use spxmesh_identity::Address;
use spxmesh_peer::{PeerEvent, PeerManager};
use spxmesh_protocol::{MessageBody, PermissionKind, Permissions};
use spxmesh_transport::{DeliveryMode, ReliableUdpTransport, TcpTransport, Transport, TransportKind};
use spxmesh_vlan::{VLanEvent, VLanService};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};

/// Everything a host application needs to know about, merged from the
/// peer manager, discovery, file engine, and VLAN event streams.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Started,
    Stopped,
    PeerDiscovered { peer: Address, endpoint: SocketAddr },
    PeerConnected { peer: Address },
    PeerDisconnected { peer: Address },
    ChatReceived { peer: Address, content: String, reply_to: Option<Uuid> },
    PermissionRequested { peer: Address, request_id: Uuid, permission: PermissionKind, display_name: Option<String> },
    PermissionResponded { peer: Address, request_id: Uuid, granted: bool },
    File(FileEvent),
    VLan(VLanEvent),
}

struct Inner {
    config: NodeConfig,
    local_address: Address,
    udp_port: u16,
    tcp_port: u16,
    peer_manager: PeerManager,
    routing_table: Arc<RoutingTable>,
    udp_transport: Arc<ReliableUdpTransport>,
    tcp_transport: Arc<TcpTransport>,
    discovery: Mutex<Option<LanDiscovery>>,
    file_engine: FileEngine,
    vlan: Mutex<Option<VLanService>>,
    running: Arc<AtomicBool>,
}

/// Cheaply cloneable handle to a running node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<Inner>,
}

impl Node {
    /// Start every subsystem and return a handle plus its merged event
    /// stream. `identity` is supplied by the caller: this crate never
    /// persists key material itself, matching the rest of the stack.
    pub async fn start(
        config: NodeConfig,
        identity: KeyPair,
    ) -> Result<(Self, mpsc::UnboundedReceiver<NodeEvent>)> {
        let local_address = Address::derive(&identity.public_key());
        let routing_table = Arc::new(RoutingTable::new(local_address));
        let (peer_manager, peer_events_rx) = PeerManager::new(identity, routing_table.clone());

        let (udp_transport, udp_events) = ReliableUdpTransport::start(config.udp_port).await?;
        let udp_port = udp_transport.local_port();
        let udp_transport = Arc::new(udp_transport);
        peer_manager.register_transport(udp_transport.clone() as Arc<dyn Transport>, udp_events);

        let (tcp_transport, tcp_events) = TcpTransport::start(config.tcp_port).await?;
        let tcp_port = tcp_transport.listen_port();
        let tcp_transport = Arc::new(tcp_transport);
        peer_manager.register_transport(tcp_transport.clone() as Arc<dyn Transport>, tcp_events);

        let (events, events_rx) = mpsc::unbounded_channel();

        let discovery = match LanDiscovery::start(local_address, config.discovery_port, udp_port).await {
            Ok((discovery, discovery_events)) => {
                spawn_discovery_forward(discovery_events, events.clone());
                Some(discovery)
            }
            Err(err) => {
                warn!(%err, "LAN discovery unavailable, continuing without it");
                None
            }
        };

        std::fs::create_dir_all(&config.data_dir).map_err(spxmesh_file::FileError::from)?;
        let share_dir = config.data_dir.join("shares");
        let (file_engine, file_events) = FileEngine::new(peer_manager.clone(), share_dir);
        spawn_file_forward(file_events, events.clone());

        let vlan = if config.vlan_enabled {
            let hostname = config.display_name.clone().unwrap_or_else(|| local_address.encode());
            match VLanService::start(
                local_address,
                hostname,
                config.vlan_capabilities.clone(),
                peer_manager.clone(),
            )
            .await
            {
                Ok((vlan, vlan_events)) => {
                    spawn_vlan_forward(vlan_events, events.clone());
                    Some(vlan)
                }
                Err(err) => {
                    warn!(%err, "VLAN overlay unavailable, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        let node = Node {
            inner: Arc::new(Inner {
                config: config.clone(),
                local_address,
                udp_port,
                tcp_port,
                peer_manager: peer_manager.clone(),
                routing_table,
                udp_transport,
                tcp_transport,
                discovery: Mutex::new(discovery),
                file_engine,
                vlan: Mutex::new(vlan),
                running: Arc::new(AtomicBool::new(true)),
            }),
        };

        spawn_peer_dispatch(node.clone(), peer_events_rx, events.clone());

        for endpoint in config.bootstrap_peers.clone() {
            let node = node.clone();
            tokio::spawn(async move {
                if let Err(err) = node.connect(endpoint).await {
                    warn!(%endpoint, %err, "bootstrap connect failed");
                }
            });
        }

        let _ = events.send(NodeEvent::Started);
        info!(address = %local_address, udp_port, tcp_port, "node started");
        Ok((node, events_rx))
    }

    pub fn local_address(&self) -> Address {
        self.inner.local_address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn peer_manager(&self) -> &PeerManager {
        &self.inner.peer_manager
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.inner.routing_table
    }

    pub fn file_engine(&self) -> &FileEngine {
        &self.inner.file_engine
    }

    /// `spx1...@host:port`, the form shared out-of-band so a remote peer
    /// can dial this node directly without LAN discovery.
    pub fn shareable_address(&self) -> Result<String> {
        let ip = local_ip_address::local_ip()
            .map_err(|_| NodeError::InvalidShareableAddress(String::new(), "no local IP address available"))?;
        Ok(format!("{}@{}:{}", self.inner.local_address.encode(), ip, self.inner.udp_port))
    }

    /// Stop every subsystem. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(discovery) = self.inner.discovery.lock().take() {
            discovery.stop();
        }
        if let Some(vlan) = self.inner.vlan.lock().take() {
            vlan.stop();
        }
        self.inner.udp_transport.stop();
        self.inner.tcp_transport.stop();
        info!(address = %self.inner.local_address, "node stopped");
    }

    /// Dial `endpoint` directly over reliable UDP and drive the
    /// handshake to completion.
    pub async fn connect(&self, endpoint: SocketAddr) -> Result<Address> {
        self.inner
            .peer_manager
            .connect(endpoint, TransportKind::ReliableUdp)
            .await
            .map_err(Into::into)
    }

    /// Look `address` up in the routing table and connect to its last
    /// known endpoint.
    pub async fn connect_by_id(&self, address: Address) -> Result<Address> {
        let endpoint = self
            .inner
            .routing_table
            .closest(&address, 1)
            .into_iter()
            .find(|node| node.address == address)
            .map(|node| node.endpoint)
            .ok_or(NodeError::PeerUnreachable(address))?;
        self.connect(endpoint).await
    }

    /// Parse `spx1...@host:port` and connect to it.
    pub async fn connect_by_shareable(&self, shareable: &str) -> Result<Address> {
        let (address_part, endpoint_part) = shareable
            .split_once('@')
            .ok_or_else(|| NodeError::InvalidShareableAddress(shareable.to_string(), "missing '@' separator"))?;
        let address: Address = address_part
            .parse()
            .map_err(|_| NodeError::InvalidShareableAddress(shareable.to_string(), "invalid address"))?;
        let endpoint: SocketAddr = endpoint_part
            .parse()
            .map_err(|_| NodeError::InvalidShareableAddress(shareable.to_string(), "invalid host:port"))?;
        let connected = self.connect(endpoint).await?;
        if connected != address {
            return Err(NodeError::InvalidShareableAddress(
                shareable.to_string(),
                "remote address did not match the advertised one",
            ));
        }
        Ok(connected)
    }

    pub fn send_chat(&self, recipient: Address, content: String, reply_to: Option<Uuid>) -> Result<()> {
        self.inner
            .peer_manager
            .send_message(recipient, MessageBody::Chat { content, reply_to }, DeliveryMode::Reliable)
            .map_err(Into::into)
    }

    /// Ask `peer` to grant `permission`; returns the request id so the
    /// caller can correlate the eventual `PermissionResponded` event.
    pub fn request_permission(
        &self,
        peer: Address,
        permission: PermissionKind,
        display_name: Option<String>,
    ) -> Result<Uuid> {
        let request_id = Uuid::new_v4();
        self.inner.peer_manager.send_message(
            peer,
            MessageBody::PermissionRequest { request_id, permission, display_name },
            DeliveryMode::Reliable,
        )?;
        Ok(request_id)
    }

    /// Answer a `PermissionRequested` event. On grant, `peer` is
    /// authorized locally for `permission` before the response goes out.
    pub fn respond_permission(
        &self,
        peer: Address,
        request_id: Uuid,
        permission: PermissionKind,
        granted: bool,
        duration_secs: Option<u64>,
    ) -> Result<()> {
        if granted {
            self.inner.peer_manager.authorize(peer, Permissions::from(permission))?;
        }
        self.inner
            .peer_manager
            .send_message(peer, MessageBody::PermissionResponse { request_id, granted, duration_secs }, DeliveryMode::Reliable)
            .map_err(Into::into)
    }

    pub fn block(&self, peer: Address) {
        self.inner.peer_manager.block(peer);
    }
}

fn spawn_peer_dispatch(node: Node, mut rx: mpsc::UnboundedReceiver<PeerEvent>, events: mpsc::UnboundedSender<NodeEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PeerEvent::PeerConnected { peer } => {
                    let _ = events.send(NodeEvent::PeerConnected { peer });
                }
                PeerEvent::PeerDisconnected { peer } => {
                    let _ = events.send(NodeEvent::PeerDisconnected { peer });
                }
                PeerEvent::PermissionRequested { peer, request_id, permission, display_name } => {
                    let _ = events.send(NodeEvent::PermissionRequested { peer, request_id, permission, display_name });
                }
                PeerEvent::DataReceived { peer, message } => {
                    if node.inner.file_engine.handle_message(peer, &message) {
                        continue;
                    }
                    let consumed_by_vlan = node
                        .inner
                        .vlan
                        .lock()
                        .as_ref()
                        .map(|vlan| vlan.handle_message(peer, &message))
                        .unwrap_or(false);
                    if consumed_by_vlan {
                        continue;
                    }
                    match message {
                        MessageBody::Chat { content, reply_to } => {
                            let _ = events.send(NodeEvent::ChatReceived { peer, content, reply_to });
                        }
                        MessageBody::PermissionResponse { request_id, granted, .. } => {
                            let _ = events.send(NodeEvent::PermissionResponded { peer, request_id, granted });
                        }
                        other => {
                            tracing::debug!(tag = other.tag(), %peer, "unhandled message reached the node dispatcher");
                        }
                    }
                }
            }
        }
    });
}

fn spawn_discovery_forward(mut rx: mpsc::UnboundedReceiver<DiscoveryEvent>, events: mpsc::UnboundedSender<NodeEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let mapped = match event {
                DiscoveryEvent::PeerDiscovered { address, endpoint } => {
                    NodeEvent::PeerDiscovered { peer: address, endpoint }
                }
                DiscoveryEvent::PeerLost { address } => NodeEvent::PeerDisconnected { peer: address },
            };
            let _ = events.send(mapped);
        }
    });
}

fn spawn_file_forward(mut rx: mpsc::UnboundedReceiver<FileEvent>, events: mpsc::UnboundedSender<NodeEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let _ = events.send(NodeEvent::File(event));
        }
    });
}

fn spawn_vlan_forward(mut rx: mpsc::UnboundedReceiver<VLanEvent>, events: mpsc::UnboundedSender<NodeEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let _ = events.send(NodeEvent::VLan(event));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shareable_address_parses_round_trip() {
        // covered by the crate-level integration tests, which exercise
        // two real nodes end to end; this module only checks pure
        // parsing helpers that don't need a running node.
        let addr = Address::derive(&KeyPair::generate().public_key());
        let shareable = format!("{}@127.0.0.1:45678", addr.encode());
        let (address_part, endpoint_part) = shareable.split_once('@').unwrap();
        assert_eq!(address_part.parse::<Address>().unwrap(), addr);
        assert_eq!(endpoint_part.parse::<SocketAddr>().unwrap(), "127.0.0.1:45678".parse().unwrap());
    }
}
