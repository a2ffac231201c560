use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use spxmesh_protocol::tcp_framing;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::{Connection, TransportKind};
use crate::delivery::DeliveryMode;
use crate::error::Result;
use crate::events::TransportEvent;

/// Length-prefixed TCP transport, used for bulk file transfer alongside
/// reliable-UDP messaging. Always reliable and ordered; `DeliveryMode`
/// is accepted for interface parity but has no effect.
pub struct TcpTransport {
    listen_port: u16,
    running: Arc<AtomicBool>,
    connections: Arc<Mutex<HashMap<Uuid, Connection>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl TcpTransport {
    pub async fn start(port: u16) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let listen_port = listener.local_addr()?.port();
        let (events, events_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let connections = Arc::new(Mutex::new(HashMap::new()));

        let transport = TcpTransport {
            listen_port,
            running: running.clone(),
            connections: connections.clone(),
            events: events.clone(),
        };

        tokio::spawn(accept_loop(listener, running, connections, events));

        Ok((transport, events_rx))
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub async fn connect(&self, endpoint: SocketAddr) -> Result<Connection> {
        let stream = TcpStream::connect(endpoint).await?;
        let connection_id = Uuid::new_v4();
        let connection = spawn_connection_tasks(
            connection_id,
            endpoint,
            stream,
            self.connections.clone(),
            self.events.clone(),
        );
        Ok(connection)
    }

    pub fn connection(&self, connection_id: Uuid) -> Option<Connection> {
        self.connections.lock().get(&connection_id).cloned()
    }

    /// Mark the connection closed and drop it from the registry. The
    /// stream's read/write loops exit on their own once the peer
    /// observes EOF or the outbound channel is no longer reachable.
    pub fn disconnect(&self, connection_id: Uuid) {
        if let Some(connection) = self.connections.lock().remove(&connection_id) {
            connection.close();
        }
        let _ = self.events.send(TransportEvent::ConnectionLost { connection_id });
    }

    /// Queue `bytes` for `connection_id`; `mode` is ignored, TCP always
    /// delivers reliably and in order.
    pub fn send(&self, connection_id: Uuid, bytes: Vec<u8>, mode: DeliveryMode) -> Result<()> {
        let connection = self
            .connections
            .lock()
            .get(&connection_id)
            .cloned()
            .ok_or(crate::error::TransportError::NoSuchConnection(connection_id))?;
        connection.send(bytes, mode)
    }
}

async fn accept_loop(
    listener: TcpListener,
    running: Arc<AtomicBool>,
    connections: Arc<Mutex<HashMap<Uuid, Connection>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while running.load(Ordering::Acquire) {
        let accepted = tokio::time::timeout(std::time::Duration::from_millis(500), listener.accept()).await;
        let (stream, remote) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(err)) => {
                warn!(%err, "tcp accept error");
                continue;
            }
            Err(_) => continue,
        };
        let connection_id = Uuid::new_v4();
        spawn_connection_tasks(connection_id, remote, stream, connections.clone(), events.clone());
        let _ = events.send(TransportEvent::ConnectionReceived {
            connection_id,
            remote_endpoint: remote,
        });
    }
}

fn spawn_connection_tasks(
    connection_id: Uuid,
    remote: SocketAddr,
    stream: TcpStream,
    connections: Arc<Mutex<HashMap<Uuid, Connection>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Connection {
    let (tx, rx) = mpsc::unbounded_channel::<(Vec<u8>, DeliveryMode)>();
    let connection = Connection::new(connection_id, remote, TransportKind::Tcp, tx);
    connections.lock().insert(connection_id, connection.clone());

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(read_loop(connection_id, read_half, connections.clone(), events.clone()));
    tokio::spawn(write_loop(write_half, rx));

    connection
}

async fn read_loop(
    connection_id: Uuid,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    connections: Arc<Mutex<HashMap<Uuid, Connection>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        let mut len_buf = [0u8; 4];
        if read_half.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let declared = u32::from_le_bytes(len_buf);
        let body_len = match tcp_framing::validate_frame_length(declared) {
            Ok(len) => len,
            Err(err) => {
                debug!(%err, "closing tcp connection on invalid frame length");
                break;
            }
        };
        let mut body = vec![0u8; body_len];
        if read_half.read_exact(&mut body).await.is_err() {
            break;
        }
        let _ = events.send(TransportEvent::DataReceived {
            connection_id,
            bytes: body,
        });
    }

    if let Some(connection) = connections.lock().remove(&connection_id) {
        connection.mark_closed();
    }
    let _ = events.send(TransportEvent::ConnectionLost { connection_id });
    let _ = events.send(TransportEvent::Disconnected { connection_id });
}

async fn write_loop(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<(Vec<u8>, DeliveryMode)>,
) {
    while let Some((bytes, _mode)) = rx.recv().await {
        let frame = match tcp_framing::encode_frame(&bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "dropping oversized tcp payload");
                continue;
            }
        };
        if write_half.write_all(&frame).await.is_err() {
            break;
        }
    }
}
