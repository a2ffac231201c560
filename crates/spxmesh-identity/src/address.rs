//! Node addresses: the 20-byte hash of a signing public key, encoded for
//! humans as `spx1` + Base58Check.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use spxmesh_crypto::hashing::blake3_32;

use crate::error::{IdentityError, Result};

pub const ADDRESS_LEN: usize = 20;
pub const ADDRESS_PREFIX: &str = "spx1";
const CHECKSUM_LEN: usize = 4;

/// A node's 20-byte address, `H(public_key)` truncated.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Derive the address owned by `public_key`.
    pub fn derive(public_key: &[u8; 32]) -> Self {
        let digest = blake3_32(public_key);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[..ADDRESS_LEN]);
        Address(bytes)
    }

    /// XOR distance between two addresses, per the Kademlia metric.
    pub fn distance(&self, other: &Address) -> [u8; ADDRESS_LEN] {
        let mut out = [0u8; ADDRESS_LEN];
        for i in 0..ADDRESS_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        out
    }

    /// Number of leading zero bits of `self.distance(other)`, i.e. the
    /// index of the K-bucket `other` belongs in relative to `self`.
    /// Clamped to `[0, 159]`.
    pub fn bucket_index(&self, other: &Address) -> usize {
        let distance = self.distance(other);
        let mut index = 0usize;
        for byte in distance.iter() {
            if *byte == 0 {
                index += 8;
                continue;
            }
            index += byte.leading_zeros() as usize;
            break;
        }
        index.min(ADDRESS_LEN * 8 - 1)
    }

    /// An address whose bucket index relative to `self` is exactly
    /// `bucket`, used to refresh a stale bucket by looking up a random
    /// id that falls in it.
    pub fn random_id_in_bucket(&self, bucket: usize) -> Address {
        let bucket = bucket.min(ADDRESS_LEN * 8 - 1);
        let mut out = self.0;
        let byte_index = bucket / 8;
        let bit_in_byte = bucket % 8;
        // Flip the bit at `bucket` (this fixes the leading `bucket` bits
        // to match self and diverges at position `bucket`).
        out[byte_index] ^= 0x80 >> bit_in_byte;
        // Randomize every bit after the divergence point.
        let mut rng = rand::rngs::OsRng;
        let mut tail_mask = [0u8; ADDRESS_LEN];
        rng.fill_bytes(&mut tail_mask);
        for i in (byte_index + 1)..ADDRESS_LEN {
            out[i] = tail_mask[i];
        }
        if bit_in_byte < 7 {
            let free_bits_mask = 0xffu8 >> (bit_in_byte + 1);
            out[byte_index] = (out[byte_index] & !free_bits_mask) | (tail_mask[byte_index] & free_bits_mask);
        }
        Address(out)
    }

    pub fn encode(&self) -> String {
        let checksum_input = blake3_32(&blake3_32(&self.0));
        let mut payload = Vec::with_capacity(ADDRESS_LEN + CHECKSUM_LEN);
        payload.extend_from_slice(&self.0);
        payload.extend_from_slice(&checksum_input[..CHECKSUM_LEN]);
        format!("{}{}", ADDRESS_PREFIX, bs58::encode(payload).into_string())
    }

    pub fn decode(s: &str) -> Result<Address> {
        let rest = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or(IdentityError::InvalidAddressPrefix)?;
        let payload = bs58::decode(rest)
            .into_vec()
            .map_err(|_| IdentityError::InvalidAddressEncoding)?;
        if payload.len() != ADDRESS_LEN + CHECKSUM_LEN {
            return Err(IdentityError::InvalidAddressLength {
                expected: ADDRESS_LEN + CHECKSUM_LEN,
                actual: payload.len(),
            });
        }
        let (hash, checksum) = payload.split_at(ADDRESS_LEN);
        let expected_checksum = blake3_32(&blake3_32(hash));
        if checksum != &expected_checksum[..CHECKSUM_LEN] {
            return Err(IdentityError::InvalidAddressChecksum);
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(hash);
        Ok(Address(bytes))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self.encode())
    }
}

impl std::str::FromStr for Address {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Address> {
        Address::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spxmesh_crypto::KeyPair;

    #[test]
    fn round_trip_encode_decode() {
        let kp = KeyPair::generate();
        let addr = Address::derive(&kp.public_key());
        let encoded = addr.encode();
        assert!(encoded.starts_with(ADDRESS_PREFIX));
        let decoded = Address::decode(&encoded).unwrap();
        assert_eq!(addr, decoded);
    }

    #[test]
    fn mutated_checksum_is_rejected() {
        let kp = KeyPair::generate();
        let addr = Address::derive(&kp.public_key());
        let mut encoded = addr.encode();
        // Flip the last character, which lands in the checksum tail.
        let mut chars: Vec<char> = encoded.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'a' { 'b' } else { 'a' };
        encoded = chars.into_iter().collect();
        assert!(Address::decode(&encoded).is_err());
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        assert!(matches!(
            Address::decode("xyz1abc"),
            Err(IdentityError::InvalidAddressPrefix)
        ));
    }

    #[test]
    fn distance_is_symmetric_and_zero_for_self() {
        let a = Address([1u8; ADDRESS_LEN]);
        let b = Address([2u8; ADDRESS_LEN]);
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a), [0u8; ADDRESS_LEN]);
    }

    #[test]
    fn bucket_index_matches_leading_zeros() {
        let a = Address([0u8; ADDRESS_LEN]);
        let mut b_bytes = [0u8; ADDRESS_LEN];
        b_bytes[0] = 0b0000_0001; // distance has 7 leading zero bits in byte 0
        let b = Address(b_bytes);
        assert_eq!(a.bucket_index(&b), 7);
    }

    #[test]
    fn random_id_in_bucket_lands_in_requested_bucket() {
        let a = Address::derive(&spxmesh_crypto::KeyPair::generate().public_key());
        for bucket in [0usize, 1, 40, 100, 159] {
            let candidate = a.random_id_in_bucket(bucket);
            assert_eq!(a.bucket_index(&candidate), bucket);
        }
    }
}
