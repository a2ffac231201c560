//! The outer UDP envelope frame:
//! `Magic(0x53505858) | Version(1) | Flags(1) | Length(4 LE) | Payload | CRC32(4)`

use crate::error::ProtocolError;

pub const MAGIC: u32 = 0x5350_5858;
pub const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 1 + 4;
const TRAILER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const ENCRYPTED: Flags = Flags(1 << 0);
    pub const COMPRESSED: Flags = Flags(1 << 1);
    pub const FRAGMENTED: Flags = Flags(1 << 2);
    pub const ACK_REQUIRED: Flags = Flags(1 << 3);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// A framed, CRC-protected UDP wire frame.
pub struct WireFrame {
    pub flags: Flags,
    pub payload: Vec<u8>,
}

impl WireFrame {
    pub fn new(flags: Flags, payload: Vec<u8>) -> Self {
        WireFrame { flags, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + TRAILER_LEN);
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(VERSION);
        out.push(self.flags.bits());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<WireFrame, ProtocolError> {
        if bytes.len() < HEADER_LEN + TRAILER_LEN {
            return Err(ProtocolError::Truncated);
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let version = bytes[4];
        if version != VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let flags = Flags::from_bits(bytes[5]);
        let length = u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize;
        let body_end = 10 + length;
        if bytes.len() != body_end + TRAILER_LEN {
            return Err(ProtocolError::LengthMismatch {
                declared: length,
                actual: bytes.len().saturating_sub(HEADER_LEN + TRAILER_LEN),
            });
        }
        let expected_crc = u32::from_le_bytes(bytes[body_end..body_end + 4].try_into().unwrap());
        let actual_crc = crc32fast::hash(&bytes[..body_end]);
        if expected_crc != actual_crc {
            return Err(ProtocolError::CrcMismatch);
        }
        Ok(WireFrame {
            flags,
            payload: bytes[10..body_end].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let frame = WireFrame::new(Flags::ENCRYPTED, vec![1, 2, 3, 4, 5]);
        let bytes = frame.encode();
        let decoded = WireFrame::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, vec![1, 2, 3, 4, 5]);
        assert!(decoded.flags.contains(Flags::ENCRYPTED));
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let frame = WireFrame::new(Flags::default(), vec![1, 2, 3]);
        let mut bytes = frame.encode();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xff;
        assert!(matches!(WireFrame::decode(&bytes), Err(ProtocolError::CrcMismatch)));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = WireFrame::new(Flags::default(), vec![1]).encode();
        bytes[0] ^= 0xff;
        assert!(matches!(WireFrame::decode(&bytes), Err(ProtocolError::BadMagic)));
    }
}
