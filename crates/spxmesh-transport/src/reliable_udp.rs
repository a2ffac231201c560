use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spxmesh_protocol::{Flags, UdpPacket, WireFrame};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::connection::{Connection, TransportKind};
use crate::delivery::DeliveryMode;
use crate::error::{Result, TransportError};
use crate::events::TransportEvent;

const MAX_RETRY_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(100);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const PUNCH_COUNT: usize = 10;
const PUNCH_INTERVAL: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 65_507;

struct PendingAck {
    packet: UdpPacket,
    endpoint: SocketAddr,
    attempt: u32,
    sent_at: Instant,
}

struct PeerState {
    connection: Connection,
}

/// Reliable-UDP transport: a custom protocol over `UdpSocket` providing
/// an application-layer handshake, exponential-backoff retry for
/// reliable sends, ping/pong latency measurement, and NAT hole punching.
pub struct ReliableUdpTransport {
    socket: Arc<UdpSocket>,
    local_port: u16,
    running: Arc<AtomicBool>,
    peers: Arc<Mutex<HashMap<SocketAddr, PeerState>>>,
    peers_by_id: Arc<Mutex<HashMap<Uuid, SocketAddr>>>,
    pending_acks: Arc<Mutex<HashMap<(Uuid, u32), PendingAck>>>,
    pending_handshakes: Arc<Mutex<HashMap<SocketAddr, Uuid>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ReliableUdpTransport {
    /// Bind `port` and start the receive and retry-sweep loops. Returns
    /// the transport plus the event receiver the peer manager drains.
    pub async fn start(port: u16) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        let local_port = socket.local_addr()?.port();
        let (events, events_rx) = mpsc::unbounded_channel();

        let transport = ReliableUdpTransport {
            socket: Arc::new(socket),
            local_port,
            running: Arc::new(AtomicBool::new(true)),
            peers: Arc::new(Mutex::new(HashMap::new())),
            peers_by_id: Arc::new(Mutex::new(HashMap::new())),
            pending_acks: Arc::new(Mutex::new(HashMap::new())),
            pending_handshakes: Arc::new(Mutex::new(HashMap::new())),
            events,
        };

        transport.spawn_receive_loop();
        transport.spawn_retry_loop();

        Ok((transport, events_rx))
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Send a `Handshake` and wait up to 10s for a connected peer state
    /// to appear for `endpoint`. The receive loop completes the
    /// handshake and registers the connection; this just blocks for it.
    pub async fn connect(&self, endpoint: SocketAddr) -> Result<Connection> {
        let connection_id = Uuid::new_v4();
        self.pending_handshakes.lock().insert(endpoint, connection_id);

        let handshake = UdpPacket::Handshake {
            timestamp: now_millis(),
        };
        self.send_raw(endpoint, &handshake).await?;

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            if let Some(state) = self.peers.lock().get(&endpoint) {
                return Ok(state.connection.clone());
            }
            if Instant::now() >= deadline {
                self.pending_handshakes.lock().remove(&endpoint);
                return Err(TransportError::HandshakeTimeout(HANDSHAKE_TIMEOUT));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Send ten `Punch` packets at 100ms intervals to open a NAT mapping
    /// for `endpoint`, then attempt a normal handshake.
    pub async fn punch_through(&self, endpoint: SocketAddr) -> Result<Connection> {
        for _ in 0..PUNCH_COUNT {
            self.send_raw(endpoint, &UdpPacket::Punch).await?;
            tokio::time::sleep(PUNCH_INTERVAL).await;
        }
        self.connect(endpoint).await
    }

    pub fn connection(&self, connection_id: Uuid) -> Option<Connection> {
        let endpoint = *self.peers_by_id.lock().get(&connection_id)?;
        self.peers.lock().get(&endpoint).map(|s| s.connection.clone())
    }

    /// Queue `bytes` on the connection's outbound channel. The
    /// per-connection task owns sequencing, pending-ack bookkeeping, and
    /// the actual socket write.
    pub fn send(&self, connection_id: Uuid, bytes: Vec<u8>, mode: DeliveryMode) -> Result<()> {
        let endpoint = *self
            .peers_by_id
            .lock()
            .get(&connection_id)
            .ok_or(TransportError::NoSuchConnection(connection_id))?;
        let connection = self
            .peers
            .lock()
            .get(&endpoint)
            .map(|state| state.connection.clone())
            .ok_or(TransportError::NoSuchConnection(connection_id))?;
        connection.send(bytes, mode)
    }

    /// Tell the remote side we're leaving, then tear down local state.
    pub fn disconnect(&self, connection_id: Uuid) {
        if let Some(endpoint) = self.peers_by_id.lock().get(&connection_id).copied() {
            let socket = self.socket.clone();
            let frame = encode_frame(&UdpPacket::Disconnect);
            tokio::spawn(async move {
                let _ = socket.send_to(&frame, endpoint).await;
            });
        }
        close_connection(connection_id, &self.peers, &self.peers_by_id, &self.events);
    }

    async fn send_raw(&self, endpoint: SocketAddr, packet: &UdpPacket) -> Result<()> {
        let frame = encode_frame(packet);
        self.socket.send_to(&frame, endpoint).await?;
        Ok(())
    }

    fn spawn_receive_loop(&self) {
        let socket = self.socket.clone();
        let running = self.running.clone();
        let peers = self.peers.clone();
        let peers_by_id = self.peers_by_id.clone();
        let pending_acks = self.pending_acks.clone();
        let pending_handshakes = self.pending_handshakes.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            while running.load(Ordering::Acquire) {
                let (len, from) = match timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await {
                    Ok(Ok(pair)) => pair,
                    Ok(Err(err)) => {
                        warn!(%err, "reliable-udp recv error");
                        continue;
                    }
                    Err(_) => continue,
                };

                let frame = match WireFrame::decode(&buf[..len]) {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(%err, "dropping malformed reliable-udp frame");
                        continue;
                    }
                };
                let packet = match UdpPacket::decode(&frame.payload) {
                    Ok(packet) => packet,
                    Err(err) => {
                        debug!(%err, "dropping unparsable reliable-udp packet");
                        continue;
                    }
                };

                handle_inbound(
                    packet,
                    from,
                    &socket,
                    &peers,
                    &peers_by_id,
                    &pending_acks,
                    &pending_handshakes,
                    &events,
                )
                .await;
            }
        });
    }

    fn spawn_retry_loop(&self) {
        let running = self.running.clone();
        let socket = self.socket.clone();
        let pending_acks = self.pending_acks.clone();
        let peers = self.peers.clone();
        let peers_by_id = self.peers_by_id.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(25));
            while running.load(Ordering::Acquire) {
                tick.tick().await;
                let mut to_resend: Vec<((Uuid, u32), SocketAddr, UdpPacket)> = Vec::new();
                let mut to_drop: Vec<(Uuid, u32)> = Vec::new();

                {
                    let mut acks = pending_acks.lock();
                    for (key, pending) in acks.iter_mut() {
                        let backoff = BASE_BACKOFF * 2u32.pow(pending.attempt);
                        if pending.sent_at.elapsed() < backoff {
                            continue;
                        }
                        if pending.attempt >= MAX_RETRY_ATTEMPTS {
                            to_drop.push(*key);
                            continue;
                        }
                        pending.attempt += 1;
                        pending.sent_at = Instant::now();
                        to_resend.push((*key, pending.endpoint, pending.packet.clone()));
                    }
                }

                for (key, endpoint, packet) in to_resend {
                    trace!(?key, %endpoint, "retrying reliable-udp packet");
                    let frame = encode_frame(&packet);
                    let _ = socket.send_to(&frame, endpoint).await;
                }

                for (connection_id, _) in to_drop {
                    pending_acks.lock().retain(|k, _| k.0 != connection_id);
                    close_connection(connection_id, &peers, &peers_by_id, &events);
                }
            }
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_inbound(
    packet: UdpPacket,
    from: SocketAddr,
    socket: &Arc<UdpSocket>,
    peers: &Arc<Mutex<HashMap<SocketAddr, PeerState>>>,
    peers_by_id: &Arc<Mutex<HashMap<Uuid, SocketAddr>>>,
    pending_acks: &Arc<Mutex<HashMap<(Uuid, u32), PendingAck>>>,
    pending_handshakes: &Arc<Mutex<HashMap<SocketAddr, Uuid>>>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    match packet {
        UdpPacket::Handshake { .. } => {
            let ack = UdpPacket::HandshakeAck {
                timestamp: now_millis(),
            };
            let _ = socket.send_to(&encode_frame(&ack), from).await;
            register_connection(from, peers, peers_by_id, pending_handshakes, pending_acks, socket, events);
        }
        UdpPacket::HandshakeAck { .. } => {
            register_connection(from, peers, peers_by_id, pending_handshakes, pending_acks, socket, events);
        }
        UdpPacket::Data { payload, .. } => {
            emit_data(from, payload, peers, events);
        }
        UdpPacket::ReliableData { sequence, payload } => {
            let ack = UdpPacket::Ack { sequence };
            let _ = socket.send_to(&encode_frame(&ack), from).await;
            emit_data(from, payload, peers, events);
        }
        UdpPacket::Ack { sequence } => {
            if let Some(connection_id) = peers.lock().get(&from).map(|s| s.connection.id()) {
                pending_acks.lock().remove(&(connection_id, sequence));
            }
        }
        UdpPacket::Ping { timestamp } => {
            let pong = UdpPacket::Pong {
                echo_timestamp: timestamp,
            };
            let _ = socket.send_to(&encode_frame(&pong), from).await;
        }
        UdpPacket::Pong { echo_timestamp } => {
            let now = now_millis();
            let latency = now.saturating_sub(echo_timestamp).min(u32::MAX as u64) as u32;
            if let Some(state) = peers.lock().get(&from) {
                state.connection.set_latency_ms(latency);
            }
        }
        UdpPacket::Disconnect => {
            if let Some(connection_id) = peers.lock().get(&from).map(|s| s.connection.id()) {
                close_connection(connection_id, peers, peers_by_id, events);
            }
        }
        UdpPacket::Punch => {
            trace!(%from, "received NAT punch packet");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn register_connection(
    endpoint: SocketAddr,
    peers: &Arc<Mutex<HashMap<SocketAddr, PeerState>>>,
    peers_by_id: &Arc<Mutex<HashMap<Uuid, SocketAddr>>>,
    pending_handshakes: &Arc<Mutex<HashMap<SocketAddr, Uuid>>>,
    pending_acks: &Arc<Mutex<HashMap<(Uuid, u32), PendingAck>>>,
    socket: &Arc<UdpSocket>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    let mut peers_guard = peers.lock();
    if peers_guard.contains_key(&endpoint) {
        return;
    }
    let connection_id = pending_handshakes
        .lock()
        .remove(&endpoint)
        .unwrap_or_else(Uuid::new_v4);

    let (tx, mut rx) = mpsc::unbounded_channel::<(Vec<u8>, DeliveryMode)>();
    let connection = Connection::new(connection_id, endpoint, TransportKind::ReliableUdp, tx);
    peers_guard.insert(
        endpoint,
        PeerState {
            connection: connection.clone(),
        },
    );
    peers_by_id.lock().insert(connection_id, endpoint);
    drop(peers_guard);

    let outbound_socket = socket.clone();
    let outbound_pending_acks = pending_acks.clone();
    let outbound_connection = connection.clone();
    tokio::spawn(async move {
        while let Some((bytes, mode)) = rx.recv().await {
            let sequence = outbound_connection.next_sequence();
            let packet = match mode {
                DeliveryMode::Reliable => UdpPacket::ReliableData {
                    sequence,
                    payload: bytes,
                },
                DeliveryMode::Unreliable | DeliveryMode::Sequenced => UdpPacket::Data {
                    sequence,
                    payload: bytes,
                },
            };
            if matches!(mode, DeliveryMode::Reliable) {
                outbound_pending_acks.lock().insert(
                    (connection_id, sequence),
                    PendingAck {
                        packet: packet.clone(),
                        endpoint,
                        attempt: 0,
                        sent_at: Instant::now(),
                    },
                );
            }
            let frame = encode_frame(&packet);
            if let Err(err) = outbound_socket.send_to(&frame, endpoint).await {
                warn!(%endpoint, %err, "reliable-udp send failed");
            }
        }
    });

    let _ = events.send(TransportEvent::ConnectionReceived {
        connection_id,
        remote_endpoint: endpoint,
    });
}

fn emit_data(
    from: SocketAddr,
    payload: Vec<u8>,
    peers: &Arc<Mutex<HashMap<SocketAddr, PeerState>>>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    let connection_id = match peers.lock().get(&from).map(|s| s.connection.id()) {
        Some(id) => id,
        None => return,
    };
    let _ = events.send(TransportEvent::DataReceived {
        connection_id,
        bytes: payload,
    });
}

fn close_connection(
    connection_id: Uuid,
    peers: &Arc<Mutex<HashMap<SocketAddr, PeerState>>>,
    peers_by_id: &Arc<Mutex<HashMap<Uuid, SocketAddr>>>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    if let Some(endpoint) = peers_by_id.lock().remove(&connection_id) {
        if let Some(state) = peers.lock().remove(&endpoint) {
            state.connection.mark_closed();
        }
    }
    let _ = events.send(TransportEvent::ConnectionLost { connection_id });
    let _ = events.send(TransportEvent::Disconnected { connection_id });
}

fn encode_frame(packet: &UdpPacket) -> Vec<u8> {
    WireFrame::new(Flags::default(), packet.encode()).encode()
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_establishes_connection_both_sides() {
        let (server, mut server_events) = ReliableUdpTransport::start(0).await.unwrap();
        let (client, mut client_events) = ReliableUdpTransport::start(0).await.unwrap();
        let server_addr: SocketAddr = ([127, 0, 0, 1], server.local_port()).into();

        let client_conn = client.connect(server_addr).await.unwrap();
        assert!(client_conn.is_connected());

        let event = tokio::time::timeout(Duration::from_secs(1), server_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TransportEvent::ConnectionReceived { .. }));

        let event = tokio::time::timeout(Duration::from_secs(1), client_events.recv())
            .await
            .unwrap();
        assert!(event.is_none() || matches!(event, Some(TransportEvent::ConnectionReceived { .. })));
    }

    #[tokio::test]
    async fn reliable_send_is_acked_and_delivered() {
        let (server, mut server_events) = ReliableUdpTransport::start(0).await.unwrap();
        let (client, _client_events) = ReliableUdpTransport::start(0).await.unwrap();
        let server_addr: SocketAddr = ([127, 0, 0, 1], server.local_port()).into();

        let client_conn = client.connect(server_addr).await.unwrap();
        client_conn
            .send(b"hello mesh".to_vec(), DeliveryMode::Reliable)
            .unwrap();

        let mut saw_data = false;
        for _ in 0..10 {
            match tokio::time::timeout(Duration::from_millis(500), server_events.recv()).await {
                Ok(Some(TransportEvent::DataReceived { bytes, .. })) => {
                    assert_eq!(bytes, b"hello mesh");
                    saw_data = true;
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_data, "expected to observe a DataReceived event");
    }
}
