//! Reliable-UDP packet types. Byte 0 of the `WireFrame` payload is the
//! type code; `Data`/`ReliableData`/`Ack` carry a 4-byte little-endian
//! sequence number ahead of the rest of the payload.

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UdpPacketType {
    Handshake = 1,
    HandshakeAck = 2,
    Data = 3,
    ReliableData = 4,
    Ack = 5,
    Ping = 6,
    Pong = 7,
    Disconnect = 8,
    Punch = 9,
}

impl UdpPacketType {
    pub fn from_byte(b: u8) -> Result<UdpPacketType, ProtocolError> {
        Ok(match b {
            1 => UdpPacketType::Handshake,
            2 => UdpPacketType::HandshakeAck,
            3 => UdpPacketType::Data,
            4 => UdpPacketType::ReliableData,
            5 => UdpPacketType::Ack,
            6 => UdpPacketType::Ping,
            7 => UdpPacketType::Pong,
            8 => UdpPacketType::Disconnect,
            9 => UdpPacketType::Punch,
            other => return Err(ProtocolError::UnknownPacketType(other)),
        })
    }
}

/// A parsed reliable-UDP packet.
#[derive(Debug, Clone)]
pub enum UdpPacket {
    Handshake { timestamp: u64 },
    HandshakeAck { timestamp: u64 },
    Data { sequence: u32, payload: Vec<u8> },
    ReliableData { sequence: u32, payload: Vec<u8> },
    Ack { sequence: u32 },
    Ping { timestamp: u64 },
    Pong { echo_timestamp: u64 },
    Disconnect,
    Punch,
}

impl UdpPacket {
    pub fn packet_type(&self) -> UdpPacketType {
        match self {
            UdpPacket::Handshake { .. } => UdpPacketType::Handshake,
            UdpPacket::HandshakeAck { .. } => UdpPacketType::HandshakeAck,
            UdpPacket::Data { .. } => UdpPacketType::Data,
            UdpPacket::ReliableData { .. } => UdpPacketType::ReliableData,
            UdpPacket::Ack { .. } => UdpPacketType::Ack,
            UdpPacket::Ping { .. } => UdpPacketType::Ping,
            UdpPacket::Pong { .. } => UdpPacketType::Pong,
            UdpPacket::Disconnect => UdpPacketType::Disconnect,
            UdpPacket::Punch => UdpPacketType::Punch,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.packet_type() as u8];
        match self {
            UdpPacket::Handshake { timestamp } | UdpPacket::HandshakeAck { timestamp } => {
                out.extend_from_slice(&timestamp.to_le_bytes());
            }
            UdpPacket::Data { sequence, payload } | UdpPacket::ReliableData { sequence, payload } => {
                out.extend_from_slice(&sequence.to_le_bytes());
                out.extend_from_slice(payload);
            }
            UdpPacket::Ack { sequence } => {
                out.extend_from_slice(&sequence.to_le_bytes());
            }
            UdpPacket::Ping { timestamp } => {
                out.extend_from_slice(&timestamp.to_le_bytes());
            }
            UdpPacket::Pong { echo_timestamp } => {
                out.extend_from_slice(&echo_timestamp.to_le_bytes());
            }
            UdpPacket::Disconnect | UdpPacket::Punch => {}
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<UdpPacket, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::Truncated);
        }
        let packet_type = UdpPacketType::from_byte(bytes[0])?;
        let rest = &bytes[1..];
        Ok(match packet_type {
            UdpPacketType::Handshake => UdpPacket::Handshake {
                timestamp: read_u64(rest)?,
            },
            UdpPacketType::HandshakeAck => UdpPacket::HandshakeAck {
                timestamp: read_u64(rest)?,
            },
            UdpPacketType::Data => {
                let (sequence, payload) = read_sequence_and_payload(rest)?;
                UdpPacket::Data { sequence, payload }
            }
            UdpPacketType::ReliableData => {
                let (sequence, payload) = read_sequence_and_payload(rest)?;
                UdpPacket::ReliableData { sequence, payload }
            }
            UdpPacketType::Ack => UdpPacket::Ack {
                sequence: read_u32(rest)?,
            },
            UdpPacketType::Ping => UdpPacket::Ping {
                timestamp: read_u64(rest)?,
            },
            UdpPacketType::Pong => UdpPacket::Pong {
                echo_timestamp: read_u64(rest)?,
            },
            UdpPacketType::Disconnect => UdpPacket::Disconnect,
            UdpPacketType::Punch => UdpPacket::Punch,
        })
    }
}

fn read_u32(bytes: &[u8]) -> Result<u32, ProtocolError> {
    bytes
        .get(0..4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or(ProtocolError::Truncated)
}

fn read_u64(bytes: &[u8]) -> Result<u64, ProtocolError> {
    bytes
        .get(0..8)
        .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
        .ok_or(ProtocolError::Truncated)
}

fn read_sequence_and_payload(bytes: &[u8]) -> Result<(u32, Vec<u8>), ProtocolError> {
    let sequence = read_u32(bytes)?;
    Ok((sequence, bytes[4..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliable_data_round_trip() {
        let packet = UdpPacket::ReliableData {
            sequence: 42,
            payload: vec![9, 9, 9],
        };
        let bytes = packet.encode();
        match UdpPacket::decode(&bytes).unwrap() {
            UdpPacket::ReliableData { sequence, payload } => {
                assert_eq!(sequence, 42);
                assert_eq!(payload, vec![9, 9, 9]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ack_round_trip() {
        let packet = UdpPacket::Ack { sequence: 7 };
        let bytes = packet.encode();
        assert!(matches!(UdpPacket::decode(&bytes).unwrap(), UdpPacket::Ack { sequence: 7 }));
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        assert!(matches!(
            UdpPacket::decode(&[200]),
            Err(ProtocolError::UnknownPacketType(200))
        ));
    }
}
