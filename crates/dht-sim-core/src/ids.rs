//! 160-bit (or configurable) ID arithmetic: XOR distance, bucket selection,
//! and the two ways an ID comes into being (random, or hashed from a string).

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::error::{Result, SimError};

/// A node or file identifier: an opaque byte string of `id_bits` bits.
///
/// Kept as a `Vec<u8>` rather than a fixed-size array because `id_bits` is a
/// runtime configuration value (the boundary scenario in the testable
/// properties requires `id_bits == 8` to work without a recompile).
///
/// Serializes as a hex string, matching the envelope encoding in §6.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub Vec<u8>);

impl NodeId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(NodeId(hex::decode(s)?))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A `FileId` shares the same representation and hashing rules as a `NodeId`.
pub type FileId = NodeId;

/// An opaque network location. The distance-weighted loss model treats
/// addresses as big-endian integers after left-zero-padding to 4 bytes;
/// beyond that the simulator never interprets their contents.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Address(pub Vec<u8>);

impl Address {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(Address(hex::decode(s)?))
    }

    /// Left-zero-pad to 4 bytes, or truncate to the low 4 bytes, per §4.9.
    pub fn normalize_to_u32(&self) -> u32 {
        let mut buf = [0u8; 4];
        let bytes = &self.0;
        if bytes.len() >= 4 {
            buf.copy_from_slice(&bytes[bytes.len() - 4..]);
        } else {
            buf[4 - bytes.len()..].copy_from_slice(bytes);
        }
        u32::from_be_bytes(buf)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Byte-wise XOR of two equal-length IDs, interpreted nowhere here as an
/// integer — callers needing bucket index or ordering do that themselves.
pub fn distance(a: &NodeId, b: &NodeId) -> Result<Vec<u8>> {
    if a.0.len() != b.0.len() {
        return Err(SimError::InvalidLength {
            a: a.0.len(),
            b: b.0.len(),
        });
    }
    Ok(a.0.iter().zip(b.0.iter()).map(|(x, y)| x ^ y).collect())
}

/// Number of significant bits in a big-endian byte string (`0` for an
/// all-zero value).
fn bit_length(bytes: &[u8]) -> usize {
    for (i, byte) in bytes.iter().enumerate() {
        if *byte != 0 {
            let leading = byte.leading_zeros() as usize;
            return (bytes.len() - i) * 8 - leading;
        }
    }
    0
}

/// Bucket index of `other` relative to `self_id`: `-1` (`None`) if equal,
/// else `bit_length(distance) - 1`.
pub fn bucket_index(self_id: &NodeId, other: &NodeId) -> Result<Option<usize>> {
    let d = distance(self_id, other)?;
    let bits = bit_length(&d);
    if bits == 0 {
        Ok(None)
    } else {
        Ok(Some(bits - 1))
    }
}

/// Draw a uniformly distributed ID of `bits` bits from the shared simulator
/// RNG. Must never be called with a node-local RNG — see the determinism
/// requirement on the RNG.
pub fn random_id(bits: usize, rng: &mut impl RngCore) -> NodeId {
    let mut buf = vec![0u8; bits / 8];
    rng.fill_bytes(&mut buf);
    NodeId(buf)
}

/// Derive an ID from a string: SHA-1 for the canonical 160-bit case,
/// otherwise SHA-256 truncated to `bits/8` bytes.
pub fn id_from_string(s: &str, bits: usize) -> NodeId {
    if bits == 160 {
        let mut hasher = Sha1::new();
        hasher.update(s.as_bytes());
        NodeId(hasher.finalize().to_vec())
    } else {
        let mut hasher = Sha256::new();
        hasher.update(s.as_bytes());
        let digest = hasher.finalize();
        NodeId(digest[..bits / 8].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn distance_is_symmetric_and_zero_for_self() {
        let a = NodeId(vec![0x12, 0x34]);
        let b = NodeId(vec![0xff, 0x00]);
        assert_eq!(
            distance(&a, &b).expect("equal lengths"),
            distance(&b, &a).expect("equal lengths")
        );
        assert_eq!(distance(&a, &a).expect("equal lengths"), vec![0, 0]);
    }

    #[test]
    fn distance_rejects_mismatched_lengths() {
        let a = NodeId(vec![0x00]);
        let b = NodeId(vec![0x00, 0x00]);
        assert!(matches!(
            distance(&a, &b),
            Err(SimError::InvalidLength { a: 1, b: 2 })
        ));
    }

    #[test]
    fn bucket_index_equal_ids_is_none() {
        let a = NodeId(vec![0x42; 20]);
        assert_eq!(bucket_index(&a, &a).expect("equal lengths"), None);
    }

    #[test]
    fn bucket_index_matches_bit_length_minus_one() {
        let self_id = NodeId(vec![0x00; 20]);
        let mut far = vec![0x00; 20];
        far[0] = 0x80;
        assert_eq!(
            bucket_index(&self_id, &NodeId(far)).expect("equal lengths"),
            Some(159)
        );

        let mut close = vec![0x00; 20];
        close[19] = 0x01;
        assert_eq!(
            bucket_index(&self_id, &NodeId(close)).expect("equal lengths"),
            Some(0)
        );
    }

    #[test]
    fn id_bits_eight_boundary() {
        let self_id = NodeId(vec![0x00]);
        let other = NodeId(vec![0x01]);
        assert_eq!(bucket_index(&self_id, &other).expect("equal lengths"), Some(0));
    }

    #[test]
    fn random_id_has_requested_length() {
        let mut rng = StdRng::seed_from_u64(7);
        let id = random_id(160, &mut rng);
        assert_eq!(id.0.len(), 20);
    }

    #[test]
    fn id_from_string_uses_sha1_at_160_bits() {
        let id = id_from_string("alice", 160);
        assert_eq!(id.0.len(), 20);
    }

    #[test]
    fn id_from_string_truncates_sha256_otherwise() {
        let id = id_from_string("alice", 64);
        assert_eq!(id.0.len(), 8);
    }
}
