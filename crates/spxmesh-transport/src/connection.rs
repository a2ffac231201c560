use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::delivery::DeliveryMode;
use crate::error::{Result, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    ReliableUdp,
    Tcp,
}

struct ConnectionInner {
    id: Uuid,
    remote_endpoint: SocketAddr,
    kind: TransportKind,
    connected: AtomicBool,
    latency_ms: AtomicU32,
    next_sequence: AtomicU32,
    outbound: mpsc::UnboundedSender<(Vec<u8>, DeliveryMode)>,
}

/// One physical link to one peer over one transport. Cheaply cloneable;
/// every clone shares the same outbound channel and liveness state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(
        id: Uuid,
        remote_endpoint: SocketAddr,
        kind: TransportKind,
        outbound: mpsc::UnboundedSender<(Vec<u8>, DeliveryMode)>,
    ) -> Self {
        Connection {
            inner: Arc::new(ConnectionInner {
                id,
                remote_endpoint,
                kind,
                connected: AtomicBool::new(true),
                latency_ms: AtomicU32::new(0),
                next_sequence: AtomicU32::new(0),
                outbound,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn remote_endpoint(&self) -> SocketAddr {
        self.inner.remote_endpoint
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn latency_ms(&self) -> u32 {
        self.inner.latency_ms.load(Ordering::Acquire)
    }

    pub(crate) fn set_latency_ms(&self, latency: u32) {
        self.inner.latency_ms.store(latency, Ordering::Release);
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.connected.store(false, Ordering::Release);
    }

    /// Close the connection from this side. Further sends fail with
    /// `ConnectionClosed`; the underlying transport's retry/read loops
    /// wind down on their own once they observe it.
    pub fn close(&self) {
        self.mark_closed();
    }

    pub(crate) fn next_sequence(&self) -> u32 {
        self.inner.next_sequence.fetch_add(1, Ordering::AcqRel)
    }

    /// Queue `bytes` for delivery. The TCP transport ignores `mode` and
    /// always delivers reliably in order.
    pub fn send(&self, bytes: Vec<u8>, mode: DeliveryMode) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed(self.inner.id));
        }
        self.inner
            .outbound
            .send((bytes, mode))
            .map_err(|_| TransportError::ConnectionClosed(self.inner.id))
    }
}
