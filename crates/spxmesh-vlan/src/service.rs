//! Overlay that makes mesh peers appear on a shared `10.147.0.0/16`
//! network: local UDP broadcasts on common game-discovery ports are
//! relayed to every VLAN peer and re-injected as local broadcasts on
//! the remote machine, so unmodified LAN games discover remote
//! players without any kernel TUN/TAP device.

use std::collections::HashMap;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use spxmesh_identity::Address;
use spxmesh_peer::PeerManager;
use spxmesh_protocol::{MessageBody, VLanPacketType};
use spxmesh_transport::DeliveryMode;

use crate::error::Result;
use crate::events::VLanEvent;
use crate::peer::VLanPeer;
use crate::virtual_ip::virtual_ip_for;

pub const VLAN_ANNOUNCE_PORT: u16 = 45680;
pub const VLAN_BROADCAST_PORT: u16 = 45681;

/// Common LAN-game discovery ports monitored for local broadcast
/// traffic to relay across the mesh.
pub const GAME_DISCOVERY_PORTS: &[u16] = &[27015, 7777, 25565, 3478, 6112, 28960];

struct Inner {
    local_address: Address,
    virtual_ip: [u8; 4],
    hostname: String,
    capabilities: Vec<String>,
    peer_manager: PeerManager,
    peers: Mutex<HashMap<Address, VLanPeer>>,
    virtual_ip_index: Mutex<HashMap<[u8; 4], Address>>,
    announced_to: Mutex<HashSet<Address>>,
    running: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<VLanEvent>,
}

/// Cheaply cloneable handle to the VLAN overlay; clones share the same
/// peer table and can be handed to spawned relay-socket tasks.
#[derive(Clone)]
pub struct VLanService {
    inner: Arc<Inner>,
}

impl VLanService {
    /// Compute this node's virtual IP, bind a relay socket for every
    /// monitored game-discovery port, and announce to every currently
    /// authorized peer.
    pub async fn start(
        local_address: Address,
        hostname: String,
        capabilities: Vec<String>,
        peer_manager: PeerManager,
    ) -> Result<(Self, mpsc::UnboundedReceiver<VLanEvent>)> {
        let virtual_ip = virtual_ip_for(&local_address);
        let (events, events_rx) = mpsc::unbounded_channel();

        let service = VLanService {
            inner: Arc::new(Inner {
                local_address,
                virtual_ip,
                hostname,
                capabilities,
                peer_manager,
                peers: Mutex::new(HashMap::new()),
                virtual_ip_index: Mutex::new(HashMap::new()),
                announced_to: Mutex::new(HashSet::new()),
                running: Arc::new(AtomicBool::new(true)),
                events,
            }),
        };

        for &port in GAME_DISCOVERY_PORTS {
            match bind_broadcast_socket(port) {
                Ok(socket) => service.spawn_relay_loop(port, Arc::new(socket)),
                Err(err) => warn!(port, %err, "failed to bind VLAN relay socket, skipping port"),
            }
        }

        service.announce(false);
        info!(virtual_ip = %crate::virtual_ip::format_ip(virtual_ip), "VLAN overlay started");
        Ok((service, events_rx))
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.announce(true);
    }

    pub fn virtual_ip(&self) -> [u8; 4] {
        self.inner.virtual_ip
    }

    pub fn peers(&self) -> Vec<VLanPeer> {
        self.inner.peers.lock().values().cloned().collect()
    }

    /// Send a `VLanAnnounce` to every connected, authorized peer.
    fn announce(&self, is_leaving: bool) {
        self.inner.peer_manager.broadcast(MessageBody::VLanAnnounce {
            virtual_ip: self.inner.virtual_ip,
            is_joining: !is_leaving,
            hostname: self.inner.hostname.clone(),
            capabilities: self.inner.capabilities.clone(),
        });
    }

    /// Entry point for every inbound application message. Returns
    /// `true` if this service consumed the message.
    pub fn handle_message(&self, from: Address, body: &MessageBody) -> bool {
        match body {
            MessageBody::VLanAnnounce {
                virtual_ip,
                is_joining,
                hostname,
                capabilities,
            } => {
                self.on_announce(from, *virtual_ip, *is_joining, hostname.clone(), capabilities.clone());
                true
            }
            MessageBody::VLanPacket {
                source_ip,
                destination_ip,
                source_port,
                destination_port,
                packet_type,
                data,
            } => {
                self.on_packet(from, *source_ip, *destination_ip, *source_port, *destination_port, *packet_type, data.clone());
                true
            }
            _ => false,
        }
    }

    fn on_announce(&self, from: Address, virtual_ip: [u8; 4], is_joining: bool, hostname: String, capabilities: Vec<String>) {
        if !is_joining {
            self.inner.peers.lock().remove(&from);
            self.inner.virtual_ip_index.lock().retain(|_, addr| *addr != from);
            self.inner.announced_to.lock().remove(&from);
            let _ = self.inner.events.send(VLanEvent::PeerLeft { peer: from });
            return;
        }

        {
            let mut index = self.inner.virtual_ip_index.lock();
            match index.get(&virtual_ip) {
                Some(existing) if *existing != from => {
                    let _ = self.inner.events.send(VLanEvent::VirtualIpCollision {
                        virtual_ip,
                        existing: *existing,
                        incoming: from,
                    });
                }
                _ => {
                    index.insert(virtual_ip, from);
                }
            }
        }

        self.inner.peers.lock().insert(
            from,
            VLanPeer {
                address: from,
                virtual_ip,
                hostname,
                capabilities,
                joined_at: Instant::now(),
            },
        );
        let _ = self.inner.events.send(VLanEvent::PeerJoined { peer: from, virtual_ip });

        let already_announced = !self.inner.announced_to.lock().insert(from);
        if !already_announced {
            let _ = self.inner.peer_manager.send_message(
                from,
                MessageBody::VLanAnnounce {
                    virtual_ip: self.inner.virtual_ip,
                    is_joining: true,
                    hostname: self.inner.hostname.clone(),
                    capabilities: self.inner.capabilities.clone(),
                },
                DeliveryMode::Reliable,
            );
        }
    }

    fn on_packet(
        &self,
        from: Address,
        source_ip: [u8; 4],
        destination_ip: [u8; 4],
        source_port: u16,
        destination_port: u16,
        packet_type: VLanPacketType,
        data: Vec<u8>,
    ) {
        let is_broadcast = destination_ip == [255, 255, 255, 255];
        if matches!(packet_type, VLanPacketType::BroadcastRelay) && is_broadcast {
            let _ = self.inner.events.send(VLanEvent::TrafficReceived {
                source_ip,
                source_port,
                destination_port,
                data: data.clone(),
            });
            self.spawn_local_rebroadcast(destination_port, data);
            return;
        }

        if destination_ip == self.inner.virtual_ip {
            let _ = self.inner.events.send(VLanEvent::TrafficReceived {
                source_ip,
                source_port,
                destination_port,
                data,
            });
            return;
        }

        let target = self.inner.virtual_ip_index.lock().get(&destination_ip).copied();
        if let Some(target) = target {
            if target != from {
                let _ = self.inner.peer_manager.send_message(
                    target,
                    MessageBody::VLanPacket {
                        source_ip,
                        destination_ip,
                        source_port,
                        destination_port,
                        packet_type,
                        data,
                    },
                    DeliveryMode::Reliable,
                );
            }
        } else {
            debug!(destination_ip = ?destination_ip, "dropping vlan packet, no known owner");
        }
    }

    fn spawn_local_rebroadcast(&self, destination_port: u16, data: Vec<u8>) {
        tokio::spawn(async move {
            let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await else { return };
            if socket.set_broadcast(true).is_err() {
                return;
            }
            let target: SocketAddr = (Ipv4Addr::new(255, 255, 255, 255), destination_port).into();
            let _ = socket.send_to(&data, target).await;
        });
    }

    fn spawn_relay_loop(&self, port: u16, socket: Arc<UdpSocket>) {
        let running = self.inner.running.clone();
        let service = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            while running.load(Ordering::Acquire) {
                let received =
                    tokio::time::timeout(std::time::Duration::from_millis(500), socket.recv_from(&mut buf)).await;
                let (len, _from) = match received {
                    Ok(Ok(pair)) => pair,
                    Ok(Err(err)) => {
                        warn!(port, %err, "vlan relay recv error");
                        continue;
                    }
                    Err(_) => continue,
                };
                service.relay_local_broadcast(port, buf[..len].to_vec());
            }
        });
    }

    fn relay_local_broadcast(&self, port: u16, data: Vec<u8>) {
        let peers: Vec<Address> = self.inner.peers.lock().keys().copied().collect();
        if peers.is_empty() {
            return;
        }
        let body = MessageBody::VLanPacket {
            source_ip: self.inner.virtual_ip,
            destination_ip: [255, 255, 255, 255],
            source_port: port,
            destination_port: port,
            packet_type: VLanPacketType::BroadcastRelay,
            data,
        };
        for peer in peers {
            let _ = self.inner.peer_manager.send_message(peer, body.clone(), DeliveryMode::Reliable);
        }
    }
}

fn bind_broadcast_socket(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spxmesh_dht::RoutingTable;
    use spxmesh_crypto::KeyPair;

    fn manager() -> PeerManager {
        let identity = KeyPair::generate();
        let local = Address::derive(&identity.public_key());
        let (manager, _events) = PeerManager::new(identity, Arc::new(RoutingTable::new(local)));
        manager
    }

    #[tokio::test]
    async fn announce_records_peer_and_maps_virtual_ip() {
        let (service, mut events) = VLanService::start(
            Address([1u8; 20]),
            "node-a".to_string(),
            vec!["voice".to_string()],
            manager(),
        )
        .await
        .unwrap();

        let remote = Address([2u8; 20]);
        let remote_ip = virtual_ip_for(&remote);
        service.handle_message(
            remote,
            &MessageBody::VLanAnnounce {
                virtual_ip: remote_ip,
                is_joining: true,
                hostname: "node-b".to_string(),
                capabilities: vec![],
            },
        );

        assert_eq!(service.peers().len(), 1);
        assert!(matches!(events.try_recv(), Ok(VLanEvent::PeerJoined { .. })));
    }

    #[tokio::test]
    async fn colliding_virtual_ip_from_new_address_emits_collision() {
        let (service, mut events) =
            VLanService::start(Address([9u8; 20]), "node".to_string(), vec![], manager()).await.unwrap();

        let first = Address([2u8; 20]);
        let second = Address([3u8; 20]);
        let shared_ip = [10, 147, 99, 1];

        service.handle_message(
            first,
            &MessageBody::VLanAnnounce {
                virtual_ip: shared_ip,
                is_joining: true,
                hostname: "first".to_string(),
                capabilities: vec![],
            },
        );
        let _ = events.try_recv();

        service.handle_message(
            second,
            &MessageBody::VLanAnnounce {
                virtual_ip: shared_ip,
                is_joining: true,
                hostname: "second".to_string(),
                capabilities: vec![],
            },
        );
        assert!(matches!(events.try_recv(), Ok(VLanEvent::VirtualIpCollision { .. })));
        assert_eq!(service.peers().len(), 2);
    }
}
