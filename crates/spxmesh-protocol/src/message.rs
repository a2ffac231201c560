//! The typed protocol message union. Every message is wrapped in an
//! [`Envelope`](spxmesh_crypto::Envelope) before it hits the wire; this
//! module only defines the plaintext shape once decrypted.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::permissions::PermissionKind;

/// One K-bucket entry as carried in a `find_node_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtNodeInfo {
    pub address: [u8; 20],
    pub endpoint: String,
}

/// One file entry as carried in a `catalog_response`. Carries the full
/// per-chunk hash list so a downloader that only knows a file through
/// someone else's catalog can still verify every chunk it receives
/// against a hash it got from that same catalog exchange, rather than
/// trusting whatever bytes a provider happens to send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFileEntry {
    pub file_hash: [u8; 32],
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub description: Option<String>,
    pub category: String,
    pub tags: Vec<String>,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub chunk_hashes: Vec<[u8; 32]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VLanPacketType {
    BroadcastRelay,
    Unicast,
}

/// The tag fully determines the expected fields: this is a `#[serde(tag
/// = "type")]` union, so the wire representation carries one discriminant
/// and nothing else is inferred from context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Handshake {
        public_key: [u8; 32],
    },
    HandshakeAck {
        accepted: bool,
        public_key: Option<[u8; 32]>,
        reason: Option<String>,
    },
    Ping {
        nonce: u64,
    },
    Pong {
        nonce: u64,
        echo_timestamp: u64,
    },
    FindNode {
        target: [u8; 20],
    },
    FindNodeResponse {
        nodes: Vec<DhtNodeInfo>,
    },
    Chat {
        content: String,
        reply_to: Option<Uuid>,
    },
    FileOffer {
        file_hash: [u8; 32],
        name: String,
        size: u64,
    },
    FileRequest {
        file_hash: [u8; 32],
    },
    FileChunk {
        file_hash: [u8; 32],
        chunk_index: u32,
        data: Vec<u8>,
    },
    VoiceData {
        sequence: u32,
        payload: Vec<u8>,
    },
    PermissionRequest {
        request_id: Uuid,
        permission: PermissionKind,
        display_name: Option<String>,
    },
    PermissionResponse {
        request_id: Uuid,
        granted: bool,
        duration_secs: Option<u64>,
    },
    CatalogRequest {
        filter: Option<String>,
        query: Option<String>,
        page: u32,
        page_size: u32,
    },
    CatalogResponse {
        peer_name: Option<String>,
        total_files: u32,
        total_size: u64,
        files: Vec<CatalogFileEntry>,
    },
    P2PChunkRequest {
        request_id: Uuid,
        file_hash: [u8; 32],
        chunk_indices: Vec<u32>,
    },
    P2PChunkResponse {
        request_id: Uuid,
        file_hash: [u8; 32],
        chunk_index: u32,
        data: Vec<u8>,
        chunk_hash: [u8; 32],
        has_more: bool,
    },
    FileAvailability {
        file_hash: [u8; 32],
        available_chunks: Vec<u32>,
    },
    VLanAnnounce {
        virtual_ip: [u8; 4],
        is_joining: bool,
        hostname: String,
        capabilities: Vec<String>,
    },
    VLanPacket {
        source_ip: [u8; 4],
        destination_ip: [u8; 4],
        source_port: u16,
        destination_port: u16,
        packet_type: VLanPacketType,
        data: Vec<u8>,
    },
}

impl MessageBody {
    /// The wire tag, for logging without deserializing the whole body.
    pub fn tag(&self) -> &'static str {
        match self {
            MessageBody::Handshake { .. } => "handshake",
            MessageBody::HandshakeAck { .. } => "handshake_ack",
            MessageBody::Ping { .. } => "ping",
            MessageBody::Pong { .. } => "pong",
            MessageBody::FindNode { .. } => "find_node",
            MessageBody::FindNodeResponse { .. } => "find_node_response",
            MessageBody::Chat { .. } => "chat",
            MessageBody::FileOffer { .. } => "file_offer",
            MessageBody::FileRequest { .. } => "file_request",
            MessageBody::FileChunk { .. } => "file_chunk",
            MessageBody::VoiceData { .. } => "voice_data",
            MessageBody::PermissionRequest { .. } => "permission_request",
            MessageBody::PermissionResponse { .. } => "permission_response",
            MessageBody::CatalogRequest { .. } => "catalog_request",
            MessageBody::CatalogResponse { .. } => "catalog_response",
            MessageBody::P2PChunkRequest { .. } => "p2p_chunk_request",
            MessageBody::P2PChunkResponse { .. } => "p2p_chunk_response",
            MessageBody::FileAvailability { .. } => "file_availability",
            MessageBody::VLanAnnounce { .. } => "vlan_announce",
            MessageBody::VLanPacket { .. } => "vlan_packet",
        }
    }
}

/// A fully formed protocol message: every message carries `id`,
/// `timestamp` (unix ms), and `sender_address`, regardless of tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub id: Uuid,
    pub timestamp: u64,
    pub sender_address: [u8; 20],
    pub body: MessageBody,
}

impl ProtocolMessage {
    pub fn new(sender_address: [u8; 20], body: MessageBody) -> Self {
        ProtocolMessage {
            id: Uuid::new_v4(),
            timestamp: now_unix_ms(),
            sender_address,
            body,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Age of this message relative to now, saturating at zero for
    /// messages that (accounting for clock skew) appear to be from the
    /// future.
    pub fn age_ms(&self) -> u64 {
        now_unix_ms().saturating_sub(self.timestamp)
    }
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_tag() {
        let msg = ProtocolMessage::new(
            [1u8; 20],
            MessageBody::Chat {
                content: "hello".into(),
                reply_to: None,
            },
        );
        let bytes = msg.to_json().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"type\":\"chat\""));
        let parsed = ProtocolMessage::from_json(&bytes).unwrap();
        assert_eq!(parsed.id, msg.id);
        match parsed.body {
            MessageBody::Chat { content, .. } => assert_eq!(content, "hello"),
            _ => panic!("wrong tag"),
        }
    }
}
