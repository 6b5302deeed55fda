// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! 160-bit Kademlia node identifiers and XOR distance.
//!
//! A [`NodeId`] is derived from the SHA-1 digest of a node's serialized public key. Distance
//! between two ids is the bit-wise XOR of their byte representations; the Kademlia bucket index
//! for a peer is the number of leading zero bits in `local.xor(peer)`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Number of bytes in a [`NodeId`] (160 bits).
pub const NODE_ID_LEN: usize = 20;

/// Number of addressable bits in a [`NodeId`], and therefore the number of k-buckets a
/// routing table keyed by this id needs.
pub const NODE_ID_BITS: u32 = (NODE_ID_LEN as u32) * 8;

/// Errors that can occur while parsing or constructing a [`NodeId`].
#[derive(Debug, Error)]
pub enum NodeIdError {
    /// The hex string did not decode to exactly [`NODE_ID_LEN`] bytes.
    #[error("invalid node id hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// The decoded byte slice was not [`NODE_ID_LEN`] bytes long.
    #[error("node id must be {NODE_ID_LEN} bytes, got {0}")]
    WrongLength(usize),
}

/// An immutable 160-bit Kademlia node identifier.
///
/// Equality and ordering are byte-wise; ordering is used only for the deterministic "polite
/// peer" rule during glare resolution (§4.5), not for any distance comparison.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// Build a `NodeId` directly from raw bytes.
    pub const fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive a `NodeId` from the canonical serialization of a public key.
    ///
    /// Per the identifier's invariant, this is `SHA-1(public_key_bytes)`.
    pub fn from_public_key(public_key_bytes: &[u8]) -> Self {
        let digest = Sha1::digest(public_key_bytes);
        let mut bytes = [0u8; NODE_ID_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Parse a `NodeId` from its hex representation.
    pub fn from_hex(s: &str) -> Result<Self, NodeIdError> {
        let decoded = hex::decode(s)?;
        if decoded.len() != NODE_ID_LEN {
            return Err(NodeIdError::WrongLength(decoded.len()));
        }
        let mut bytes = [0u8; NODE_ID_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    /// Render the `NodeId` as a lowercase hex string.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// XOR distance between `self` and `other`.
    pub fn xor(&self, other: &NodeId) -> NodeId {
        let mut out = [0u8; NODE_ID_LEN];
        for i in 0..NODE_ID_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        NodeId(out)
    }

    /// Number of leading zero bits, scanning from the most significant bit.
    ///
    /// Returns `NODE_ID_BITS` (160) when every bit is zero, i.e. when called on
    /// `a.xor(a)` for any `a`.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut zeros = 0u32;
        for byte in self.0 {
            if byte == 0 {
                zeros += 8;
                continue;
            }
            zeros += byte.leading_zeros();
            break;
        }
        zeros
    }

    /// Convenience: the Kademlia bucket index a peer with this id (as a distance, i.e.
    /// `local.xor(peer)`) falls into. Buckets are indexed `0..=NODE_ID_BITS-1`; distance zero
    /// (identical ids) has no bucket and must be filtered out by the caller.
    pub fn bucket_index(&self) -> Option<u32> {
        let lzb = self.leading_zero_bits();
        if lzb >= NODE_ID_BITS {
            None
        } else {
            Some(lzb)
        }
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl From<[u8; NODE_ID_LEN]> for NodeId {
    fn from(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_xor_distance_msb() {
        let a = NodeId::from_bytes([0u8; NODE_ID_LEN]);
        let mut b_bytes = [0u8; NODE_ID_LEN];
        b_bytes[0] = 0x80;
        let b = NodeId::from_bytes(b_bytes);
        assert_eq!(a.xor(&b).leading_zero_bits(), 0);
    }

    #[test]
    fn s2_identical_ids_full_distance() {
        let a = NodeId::from_bytes([0xaa; NODE_ID_LEN]);
        assert_eq!(a.xor(&a).leading_zero_bits(), NODE_ID_BITS);
    }

    #[test]
    fn hex_round_trip() {
        let a = NodeId::from_public_key(b"some-public-key-bytes");
        let round_tripped = NodeId::from_hex(&a.to_hex()).expect("valid hex");
        assert_eq!(a, round_tripped);
    }

    #[test]
    fn xor_is_symmetric_and_self_inverse() {
        let a = NodeId::from_public_key(b"node-a");
        let b = NodeId::from_public_key(b"node-b");
        assert_eq!(a.xor(&b), b.xor(&a));
        assert_eq!(a.xor(&a), NodeId::from_bytes([0; NODE_ID_LEN]));
        assert_ne!(a.xor(&b), NodeId::from_bytes([0; NODE_ID_LEN]));
    }

    #[test]
    fn derivation_is_deterministic_and_distinguishes_keys() {
        let a1 = NodeId::from_public_key(b"key-one");
        let a2 = NodeId::from_public_key(b"key-one");
        let b = NodeId::from_public_key(b"key-two");
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn ordering_is_total_and_lexicographic() {
        let low = NodeId::from_bytes([0x00; NODE_ID_LEN]);
        let high = NodeId::from_bytes([0xff; NODE_ID_LEN]);
        assert!(low < high);
    }

    #[test]
    fn invalid_hex_length_is_rejected() {
        let err = NodeId::from_hex("aabb").unwrap_err();
        assert!(matches!(err, NodeIdError::WrongLength(_)));
    }

    #[test]
    fn bucket_index_is_none_for_self() {
        let a = NodeId::from_public_key(b"self");
        assert_eq!(a.xor(&a).bucket_index(), None);
    }

    impl quickcheck::Arbitrary for NodeId {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            use quickcheck::Arbitrary;
            let mut bytes = [0u8; NODE_ID_LEN];
            for byte in bytes.iter_mut() {
                *byte = u8::arbitrary(g);
            }
            NodeId(bytes)
        }
    }

    /// §8 invariant 6: hex round-trips for any id, not just the handful of fixed examples
    /// above.
    #[quickcheck_macros::quickcheck]
    fn prop_hex_round_trip(id: NodeId) -> bool {
        matches!(NodeId::from_hex(&id.to_hex()), Ok(round_tripped) if round_tripped == id)
    }

    /// §8 invariant 7: XOR is symmetric, self-inverse, and non-zero for distinct ids.
    #[quickcheck_macros::quickcheck]
    fn prop_xor_symmetric_and_self_inverse(a: NodeId, b: NodeId) -> bool {
        let zero = NodeId::from_bytes([0; NODE_ID_LEN]);
        a.xor(&b) == b.xor(&a) && a.xor(&a) == zero && (a == b || a.xor(&b) != zero)
    }

    /// §8 invariant 1 (restated as a law): the bucket index always equals the distance's
    /// leading-zero-bit count, for any pair of distinct ids.
    #[quickcheck_macros::quickcheck]
    fn prop_bucket_index_matches_leading_zero_bits(a: NodeId, b: NodeId) -> bool {
        let distance = a.xor(&b);
        match distance.bucket_index() {
            Some(index) => index == distance.leading_zero_bits(),
            None => a == b,
        }
    }
}
