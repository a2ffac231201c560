//! Owns the peer registry, drives the application-layer handshake over
//! whichever transport produced a connection, and encrypts/decrypts/
//! dispatches every typed message that crosses it.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use spxmesh_crypto::{Envelope, KeyPair};
use spxmesh_dht::{RoutingTable, K};
use spxmesh_identity::Address;
use spxmesh_protocol::{DhtNodeInfo, MessageBody, Permissions, ProtocolMessage};
use spxmesh_transport::{DeliveryMode, Transport, TransportEvent, TransportKind};

use crate::error::{PeerError, Result};
use crate::events::PeerEvent;
use crate::peer::{Peer, PeerStatus};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Chat and PermissionRequest older than this are dropped as a replay,
/// per the security model (spec §9 open question, resolved in
/// SPEC_FULL.md).
const REPLAY_WINDOW_MS: u64 = 5 * 60 * 1000;

struct PendingHandshake {
    waiter: Option<oneshot::Sender<Result<Address>>>,
    kind: TransportKind,
    remote_endpoint: SocketAddr,
}

struct Inner {
    identity: KeyPair,
    local_address: Address,
    peers: Mutex<HashMap<Address, Peer>>,
    blocked: Mutex<HashSet<Address>>,
    connection_index: Mutex<HashMap<Uuid, Address>>,
    pending: Mutex<HashMap<Uuid, PendingHandshake>>,
    transports: Mutex<HashMap<TransportKind, Arc<dyn Transport>>>,
    routing_table: Arc<RoutingTable>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

/// Cheaply cloneable handle to the peer manager; every clone shares the
/// same registry and can be handed to a spawned transport-drain task.
#[derive(Clone)]
pub struct PeerManager {
    inner: Arc<Inner>,
}

impl PeerManager {
    pub fn new(
        identity: KeyPair,
        routing_table: Arc<RoutingTable>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let local_address = Address::derive(&identity.public_key());
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = PeerManager {
            inner: Arc::new(Inner {
                identity,
                local_address,
                peers: Mutex::new(HashMap::new()),
                blocked: Mutex::new(HashSet::new()),
                connection_index: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                transports: Mutex::new(HashMap::new()),
                routing_table,
                events,
            }),
        };
        (manager, events_rx)
    }

    pub fn local_address(&self) -> Address {
        self.inner.local_address
    }

    /// Register a transport and start draining its event stream. Safe
    /// to call for both `ReliableUdpTransport` and `TcpTransport`.
    pub fn register_transport(
        &self,
        transport: Arc<dyn Transport>,
        events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let kind = transport.kind();
        self.inner.transports.lock().insert(kind, transport);
        let manager = self.clone();
        tokio::spawn(async move { manager.drain_transport_events(kind, events_rx).await });
    }

    fn transport_for(&self, kind: TransportKind) -> Result<Arc<dyn Transport>> {
        self.inner
            .transports
            .lock()
            .get(&kind)
            .cloned()
            .ok_or(PeerError::UnknownTransport(kind))
    }

    /// Dial `endpoint` on `kind` and drive the application handshake to
    /// completion, returning the remote's address once both sides have
    /// exchanged public keys. Times out after 10s.
    pub async fn connect(&self, endpoint: SocketAddr, kind: TransportKind) -> Result<Address> {
        let transport = self.transport_for(kind)?;
        let connection = transport.connect(endpoint).await?;
        let connection_id = connection.id();

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(
            connection_id,
            PendingHandshake {
                waiter: Some(tx),
                kind,
                remote_endpoint: endpoint,
            },
        );
        self.spawn_handshake_timeout(connection_id, kind);

        self.send_plain(
            kind,
            connection_id,
            MessageBody::Handshake {
                public_key: self.inner.identity.public_key(),
            },
        )?;

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            _ => {
                self.inner.pending.lock().remove(&connection_id);
                transport.disconnect(connection_id);
                Err(PeerError::HandshakeTimeout(endpoint))
            }
        }
    }

    fn spawn_handshake_timeout(&self, connection_id: Uuid, kind: TransportKind) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(HANDSHAKE_TIMEOUT).await;
            let pending = manager.inner.pending.lock().remove(&connection_id);
            if let Some(pending) = pending {
                if let Ok(transport) = manager.transport_for(kind) {
                    transport.disconnect(connection_id);
                }
                if let Some(waiter) = pending.waiter {
                    let _ = waiter.send(Err(PeerError::HandshakeTimeout(pending.remote_endpoint)));
                }
            }
        });
    }

    async fn drain_transport_events(
        &self,
        kind: TransportKind,
        mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events_rx.recv().await {
            match event {
                TransportEvent::ConnectionReceived {
                    connection_id,
                    remote_endpoint,
                } => self.on_connection_received(kind, connection_id, remote_endpoint),
                TransportEvent::DataReceived { connection_id, bytes } => {
                    self.on_data_received(kind, connection_id, bytes)
                }
                TransportEvent::ConnectionLost { connection_id }
                | TransportEvent::Disconnected { connection_id } => {
                    self.on_connection_lost(connection_id)
                }
            }
        }
    }

    /// `ReliableUdpTransport` fires this for both inbound handshakes and
    /// the local side of an outbound one (its own connect() already
    /// registered a `PendingHandshake` with a waiter), so only start a
    /// fresh timeout sweep when the entry is genuinely new.
    fn on_connection_received(&self, kind: TransportKind, connection_id: Uuid, remote_endpoint: SocketAddr) {
        use std::collections::hash_map::Entry;
        let is_new = match self.inner.pending.lock().entry(connection_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(PendingHandshake {
                    waiter: None,
                    kind,
                    remote_endpoint,
                });
                true
            }
        };
        if is_new {
            self.spawn_handshake_timeout(connection_id, kind);
        }
    }

    fn on_connection_lost(&self, connection_id: Uuid) {
        self.inner.pending.lock().remove(&connection_id);
        let Some(address) = self.inner.connection_index.lock().remove(&connection_id) else {
            return;
        };
        let mut became_disconnected = false;
        if let Some(peer) = self.inner.peers.lock().get_mut(&address) {
            peer.remove_connection(connection_id);
            if !peer.is_connected() && peer.status != PeerStatus::Blocked {
                peer.status = PeerStatus::Disconnected;
                became_disconnected = true;
            }
        }
        if became_disconnected {
            let _ = self.inner.events.send(PeerEvent::PeerDisconnected { peer: address });
        }
    }

    fn on_data_received(&self, kind: TransportKind, connection_id: Uuid, bytes: Vec<u8>) {
        let Some(message) = decode_incoming(&self.inner.identity, &bytes) else {
            debug!(%connection_id, "dropping unparsable frame");
            return;
        };

        let known = self.inner.connection_index.lock().get(&connection_id).copied();
        match known {
            Some(address) => self.dispatch_authenticated(address, message),
            None => self.dispatch_handshake(kind, connection_id, message),
        }
    }

    fn dispatch_handshake(&self, kind: TransportKind, connection_id: Uuid, message: ProtocolMessage) {
        match message.body {
            MessageBody::Handshake { public_key } => {
                let remote_address = Address::derive(&public_key);
                let endpoint = self
                    .inner
                    .pending
                    .lock()
                    .get(&connection_id)
                    .map(|p| p.remote_endpoint);
                let Some(endpoint) = endpoint else { return };

                if self.inner.blocked.lock().contains(&remote_address) {
                    let _ = self.send_plain(
                        kind,
                        connection_id,
                        MessageBody::HandshakeAck {
                            accepted: false,
                            public_key: None,
                            reason: Some("Blocked".to_string()),
                        },
                    );
                    self.inner.pending.lock().remove(&connection_id);
                    if let Ok(transport) = self.transport_for(kind) {
                        transport.disconnect(connection_id);
                    }
                    return;
                }

                let _ = self.send_plain(
                    kind,
                    connection_id,
                    MessageBody::HandshakeAck {
                        accepted: true,
                        public_key: Some(self.inner.identity.public_key()),
                        reason: None,
                    },
                );
                self.complete_handshake(kind, connection_id, remote_address, public_key, endpoint);
            }
            MessageBody::HandshakeAck {
                accepted,
                public_key,
                reason,
            } => {
                if !accepted {
                    if let Some(pending) = self.inner.pending.lock().remove(&connection_id) {
                        if let Some(waiter) = pending.waiter {
                            let _ = waiter.send(Err(PeerError::HandshakeRejected(
                                reason.unwrap_or_else(|| "rejected".to_string()),
                            )));
                        }
                    }
                    if let Ok(transport) = self.transport_for(kind) {
                        transport.disconnect(connection_id);
                    }
                    return;
                }
                let Some(public_key) = public_key else { return };
                let remote_address = Address::derive(&public_key);
                let endpoint = self
                    .inner
                    .pending
                    .lock()
                    .get(&connection_id)
                    .map(|p| p.remote_endpoint);
                let Some(endpoint) = endpoint else { return };
                self.complete_handshake(kind, connection_id, remote_address, public_key, endpoint);
            }
            other => {
                debug!(tag = other.tag(), "ignoring application message before handshake completes");
            }
        }
    }

    fn complete_handshake(
        &self,
        kind: TransportKind,
        connection_id: Uuid,
        remote_address: Address,
        public_key: [u8; 32],
        endpoint: SocketAddr,
    ) {
        let Ok(transport) = self.transport_for(kind) else { return };
        let Some(connection) = transport.connection(connection_id) else { return };

        {
            let mut peers = self.inner.peers.lock();
            let peer = peers
                .entry(remote_address)
                .or_insert_with(|| Peer::new(remote_address));
            peer.public_key = Some(public_key);
            peer.status = PeerStatus::Authenticated;
            peer.add_connection(connection);
            peer.touch();
        }
        self.inner.connection_index.lock().insert(connection_id, remote_address);
        self.inner.routing_table.add(remote_address, endpoint);

        if let Some(pending) = self.inner.pending.lock().remove(&connection_id) {
            if let Some(waiter) = pending.waiter {
                let _ = waiter.send(Ok(remote_address));
            }
        }
        info!(peer = %remote_address, "handshake complete");
        let _ = self.inner.events.send(PeerEvent::PeerConnected { peer: remote_address });
    }

    fn dispatch_authenticated(&self, address: Address, message: ProtocolMessage) {
        if let Some(peer) = self.inner.peers.lock().get_mut(&address) {
            peer.touch();
        }
        let stale = message.age_ms() > REPLAY_WINDOW_MS;

        match message.body {
            MessageBody::Ping { nonce } => {
                let _ = self.send_message(
                    address,
                    MessageBody::Pong {
                        nonce,
                        echo_timestamp: message.timestamp,
                    },
                    DeliveryMode::Reliable,
                );
            }
            MessageBody::FindNode { target } => {
                let nodes = self
                    .inner
                    .routing_table
                    .closest(&Address(target), K)
                    .into_iter()
                    .map(|n| DhtNodeInfo {
                        address: n.address.0,
                        endpoint: n.endpoint.to_string(),
                    })
                    .collect();
                let _ = self.send_message(
                    address,
                    MessageBody::FindNodeResponse { nodes },
                    DeliveryMode::Reliable,
                );
            }
            MessageBody::PermissionRequest {
                request_id,
                permission,
                display_name,
            } => {
                if stale {
                    debug!(%address, "dropping stale permission request (replay window)");
                    return;
                }
                let _ = self.inner.events.send(PeerEvent::PermissionRequested {
                    peer: address,
                    request_id,
                    permission,
                    display_name,
                });
            }
            MessageBody::Chat { .. } if stale => {
                debug!(%address, "dropping stale chat message (replay window)");
            }
            other => {
                let _ = self.inner.events.send(PeerEvent::DataReceived {
                    peer: address,
                    message: other,
                });
            }
        }
    }

    /// Encrypt `body` for `to` and hand it to the peer's best connection.
    pub fn send_message(&self, to: Address, body: MessageBody, mode: DeliveryMode) -> Result<()> {
        let (connection, public_key) = {
            let peers = self.inner.peers.lock();
            let peer = peers.get(&to).ok_or(PeerError::PeerNotFound(to))?;
            let connection = peer.best_connection().ok_or(PeerError::NoConnection(to))?.clone();
            let public_key = peer.public_key.ok_or(PeerError::NoConnection(to))?;
            (connection, public_key)
        };
        let message = ProtocolMessage::new(self.inner.local_address.0, body);
        let plaintext = message.to_json()?;
        let envelope = Envelope::encrypt_for(
            &self.inner.identity,
            self.inner.local_address.0,
            &public_key,
            &plaintext,
        )?;
        connection.send(envelope.to_bytes(), mode)?;
        Ok(())
    }

    fn send_plain(&self, kind: TransportKind, connection_id: Uuid, body: MessageBody) -> Result<()> {
        let transport = self.transport_for(kind)?;
        let message = ProtocolMessage::new(self.inner.local_address.0, body);
        let bytes = message.to_json()?;
        transport.send(connection_id, bytes, DeliveryMode::Reliable)?;
        Ok(())
    }

    /// Send `body` to every connected, authorized peer; per-peer
    /// failures are swallowed, matching the spec's broadcast contract.
    pub fn broadcast(&self, body: MessageBody) {
        let recipients: Vec<Address> = self
            .inner
            .peers
            .lock()
            .values()
            .filter(|p| p.status == PeerStatus::Authorized && p.is_connected())
            .map(|p| p.address)
            .collect();
        for address in recipients {
            let _ = self.send_message(address, body.clone(), DeliveryMode::Reliable);
        }
    }

    /// Mark `address` authorized with `permissions`. Rejected if the
    /// peer is blocked: block then authorize never succeeds.
    pub fn authorize(&self, address: Address, permissions: Permissions) -> Result<()> {
        if self.inner.blocked.lock().contains(&address) {
            return Err(PeerError::Blocked(address));
        }
        let mut peers = self.inner.peers.lock();
        let peer = peers.entry(address).or_insert_with(|| Peer::new(address));
        peer.status = PeerStatus::Authorized;
        peer.permissions.insert(permissions);
        Ok(())
    }

    pub fn revoke(&self, address: Address) {
        if let Some(peer) = self.inner.peers.lock().get_mut(&address) {
            peer.permissions = Permissions::NONE;
        }
    }

    /// Block `address`: marks it blocked, closes every open connection,
    /// and causes future inbound handshakes for it to be rejected.
    pub fn block(&self, address: Address) {
        self.inner.blocked.lock().insert(address);
        let mut peers = self.inner.peers.lock();
        let peer = peers.entry(address).or_insert_with(|| Peer::new(address));
        peer.status = PeerStatus::Blocked;
        peer.permissions = Permissions::NONE;
        for connection in peer.connections.drain(..) {
            if let Ok(transport) = self.transport_for(connection.kind()) {
                transport.disconnect(connection.id());
            }
        }
    }

    pub fn is_blocked(&self, address: &Address) -> bool {
        self.inner.blocked.lock().contains(address)
    }

    pub fn peer(&self, address: &Address) -> Option<Peer> {
        self.inner.peers.lock().get(address).cloned()
    }

    pub fn connected_count(&self) -> usize {
        self.inner.peers.lock().values().filter(|p| p.is_connected()).count()
    }

    /// Addresses of every peer with at least one live connection,
    /// regardless of authorization state.
    pub fn connected_peers(&self) -> Vec<Address> {
        self.inner
            .peers
            .lock()
            .values()
            .filter(|p| p.is_connected())
            .map(|p| p.address)
            .collect()
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.inner.routing_table
    }
}

/// Try to parse `bytes` as an envelope and decrypt it; on structural
/// parse failure (no envelope format present), accept the bytes as
/// plaintext JSON, which is the handshake-phase fallback. A structurally
/// valid envelope that fails signature verification or decryption is a
/// protocol error, logged and dropped rather than retried.
fn decode_incoming(identity: &KeyPair, bytes: &[u8]) -> Option<ProtocolMessage> {
    match Envelope::from_bytes(bytes) {
        Ok(envelope) => match Envelope::decrypt_from(identity, &envelope) {
            Ok(plaintext) => ProtocolMessage::from_json(&plaintext).ok(),
            Err(err) => {
                warn!(%err, "envelope failed verification/decryption, dropping");
                None
            }
        },
        Err(_) => ProtocolMessage::from_json(bytes).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spxmesh_dht::RoutingTable;
    use spxmesh_transport::ReliableUdpTransport;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    fn manager() -> PeerManager {
        let identity = KeyPair::generate();
        let local = Address::derive(&identity.public_key());
        let (manager, _events) = PeerManager::new(identity, Arc::new(RoutingTable::new(local)));
        manager
    }

    #[test]
    fn authorize_after_block_is_rejected() {
        let manager = manager();
        let other = Address::derive(&KeyPair::generate().public_key());
        manager.block(other);
        assert!(manager.authorize(other, Permissions::CONTACT).is_err());
        assert!(manager.is_blocked(&other));
    }

    #[test]
    fn block_after_authorize_leaves_peer_blocked() {
        let manager = manager();
        let other = Address::derive(&KeyPair::generate().public_key());
        manager.authorize(other, Permissions::CONTACT).unwrap();
        manager.block(other);
        let peer = manager.peer(&other).unwrap();
        assert_eq!(peer.status, PeerStatus::Blocked);
        assert!(peer.permissions.is_empty());
    }

    async fn udp_manager() -> (PeerManager, u16) {
        let identity = KeyPair::generate();
        let local = Address::derive(&identity.public_key());
        let (manager, _events) = PeerManager::new(identity, Arc::new(RoutingTable::new(local)));
        let (transport, events_rx) = ReliableUdpTransport::start(0).await.unwrap();
        let port = transport.local_port();
        manager.register_transport(Arc::new(transport), events_rx);
        (manager, port)
    }

    #[tokio::test]
    async fn handshake_authenticates_both_sides() {
        let (a, _a_port) = udp_manager().await;
        let (b, b_port) = udp_manager().await;
        let b_addr: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, b_port));

        let remote = a.connect(b_addr, TransportKind::ReliableUdp).await.unwrap();
        assert_eq!(remote, b.local_address());

        // give the acceptor a moment to process the inbound handshake
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.connected_count(), 1);
        assert_eq!(b.connected_count(), 1);
    }
}
