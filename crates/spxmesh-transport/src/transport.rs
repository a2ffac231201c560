use std::net::SocketAddr;

use async_trait::async_trait;
use uuid::Uuid;

use crate::connection::Connection;
use crate::delivery::DeliveryMode;
use crate::error::Result;

/// Common shape shared by `ReliableUdpTransport` and `TcpTransport`, so
/// the peer manager can register and drive either without caring which
/// one it's talking to.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> crate::connection::TransportKind;
    async fn connect(&self, endpoint: SocketAddr) -> Result<Connection>;
    fn connection(&self, connection_id: Uuid) -> Option<Connection>;
    fn send(&self, connection_id: Uuid, bytes: Vec<u8>, mode: DeliveryMode) -> Result<()>;
    fn disconnect(&self, connection_id: Uuid);
    fn stop(&self);
}

#[async_trait]
impl Transport for crate::reliable_udp::ReliableUdpTransport {
    fn kind(&self) -> crate::connection::TransportKind {
        crate::connection::TransportKind::ReliableUdp
    }

    async fn connect(&self, endpoint: SocketAddr) -> Result<Connection> {
        self.connect(endpoint).await
    }

    fn connection(&self, connection_id: Uuid) -> Option<Connection> {
        self.connection(connection_id)
    }

    fn send(&self, connection_id: Uuid, bytes: Vec<u8>, mode: DeliveryMode) -> Result<()> {
        self.send(connection_id, bytes, mode)
    }

    fn disconnect(&self, connection_id: Uuid) {
        self.disconnect(connection_id)
    }

    fn stop(&self) {
        self.stop()
    }
}

#[async_trait]
impl Transport for crate::tcp::TcpTransport {
    fn kind(&self) -> crate::connection::TransportKind {
        crate::connection::TransportKind::Tcp
    }

    async fn connect(&self, endpoint: SocketAddr) -> Result<Connection> {
        self.connect(endpoint).await
    }

    fn connection(&self, connection_id: Uuid) -> Option<Connection> {
        self.connection(connection_id)
    }

    fn send(&self, connection_id: Uuid, bytes: Vec<u8>, mode: DeliveryMode) -> Result<()> {
        self.send(connection_id, bytes, mode)
    }

    fn disconnect(&self, connection_id: Uuid) {
        self.disconnect(connection_id)
    }

    fn stop(&self) {
        self.stop()
    }
}
