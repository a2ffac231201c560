//! Length-prefixed TCP framing: `Length(4 LE) | Bytes`, with length in
//! `(0, 100 MiB]`. A violating length terminates the connection.

use crate::error::ProtocolError;

pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.is_empty() || payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::InvalidFrameLength(payload.len()));
    }
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Validate a length prefix read off the wire before allocating a buffer
/// for the body. Returns the number of body bytes still to read.
pub fn validate_frame_length(declared: u32) -> Result<usize, ProtocolError> {
    let len = declared as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(ProtocolError::InvalidFrameLength(len));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_validate() {
        let frame = encode_frame(b"hello").unwrap();
        let declared = u32::from_le_bytes(frame[0..4].try_into().unwrap());
        let len = validate_frame_length(declared).unwrap();
        assert_eq!(len, 5);
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn zero_length_rejected() {
        assert!(encode_frame(b"").is_err());
        assert!(validate_frame_length(0).is_err());
    }

    #[test]
    fn oversized_length_rejected() {
        assert!(validate_frame_length((MAX_FRAME_LEN + 1) as u32).is_err());
    }
}
