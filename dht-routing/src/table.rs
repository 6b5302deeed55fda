// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! The Kademlia k-bucket routing table.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use dht_id::{NodeId, NODE_ID_BITS};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::metadata::PeerMetadata;

/// The default bucket capacity, `k`, from the Kademlia literature and this spec.
pub const DEFAULT_K: usize = 20;

/// A single routing-table entry: a peer id paired with its current metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    /// The peer's node id.
    pub node_id: NodeId,
    /// The peer's current metadata.
    pub metadata: PeerMetadata,
}

/// The result of attempting to [`RoutingTable::insert`] a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The peer was inserted (its bucket had room, or it already existed and was
    /// refreshed).
    Inserted,
    /// The peer's bucket is full; `incumbent` is the least-recently-seen entry that
    /// should be probed with a ping before a final admission decision is made (see
    /// [`RoutingTable::resolve_replacement`]).
    ReplaceCandidate(PeerRecord),
    /// The peer was rejected because it is the routing table's own local id.
    RejectedSelf,
}

/// A 160-bucket Kademlia routing table keyed by XOR distance to a fixed local id.
///
/// The table is the only process-global mutable structure in the core (§5); all access
/// goes through these methods, which serialize concurrent callers with an internal lock.
/// Bucket entries are ordered least-recently-seen first, matching the Kademlia eviction
/// policy in §4.2.
pub struct RoutingTable {
    local_id: NodeId,
    k: usize,
    buckets: RwLock<Buckets>,
}

struct Buckets {
    /// `order[i]` holds the node ids in bucket `i`, least-recently-seen at the front.
    order: Vec<VecDeque<NodeId>>,
    /// Metadata by node id, kept in sync with `order`.
    metadata: HashMap<NodeId, PeerMetadata>,
}

impl RoutingTable {
    /// Create an empty routing table for the given local id with the default bucket
    /// capacity.
    pub fn new(local_id: NodeId) -> Self {
        Self::with_bucket_size(local_id, DEFAULT_K)
    }

    /// Create an empty routing table with an explicit bucket capacity `k`.
    pub fn with_bucket_size(local_id: NodeId, k: usize) -> Self {
        Self {
            local_id,
            k,
            buckets: RwLock::new(Buckets {
                order: (0..NODE_ID_BITS).map(|_| VecDeque::new()).collect(),
                metadata: HashMap::new(),
            }),
        }
    }

    /// This table's local id. Never present as an entry in the table itself.
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// The configured bucket capacity.
    pub fn bucket_size(&self) -> usize {
        self.k
    }

    fn bucket_index_for(&self, peer_id: &NodeId) -> Option<usize> {
        self.local_id.xor(peer_id).bucket_index().map(|i| i as usize)
    }

    /// Insert or refresh a peer.
    ///
    /// If the peer already has an entry, its metadata is atomically replaced and it is
    /// moved to the most-recently-seen slot. Otherwise, if its bucket has room, it is
    /// inserted at the most-recently-seen slot. If the bucket is full, the caller must
    /// probe the returned incumbent and call [`RoutingTable::resolve_replacement`].
    pub async fn insert(&self, peer_id: NodeId, metadata: PeerMetadata) -> InsertOutcome {
        if peer_id == self.local_id {
            return InsertOutcome::RejectedSelf;
        }
        let Some(bucket_index) = self.bucket_index_for(&peer_id) else {
            return InsertOutcome::RejectedSelf;
        };

        let mut buckets = self.buckets.write().await;
        let bucket = &mut buckets.order[bucket_index];

        if let Some(pos) = bucket.iter().position(|id| *id == peer_id) {
            bucket.remove(pos);
            bucket.push_back(peer_id);
            buckets.metadata.insert(peer_id, metadata);
            trace!(%peer_id, "refreshed existing routing table entry");
            return InsertOutcome::Inserted;
        }

        if bucket.len() < self.k {
            bucket.push_back(peer_id);
            buckets.metadata.insert(peer_id, metadata);
            debug!(%peer_id, bucket_index, "inserted new routing table entry");
            return InsertOutcome::Inserted;
        }

        let incumbent_id = bucket
            .front()
            .copied()
            .expect("bucket at capacity k > 0 always has a front entry");
        let incumbent_metadata = buckets
            .metadata
            .get(&incumbent_id)
            .cloned()
            .unwrap_or_else(|| metadata.clone());
        InsertOutcome::ReplaceCandidate(PeerRecord {
            node_id: incumbent_id,
            metadata: incumbent_metadata,
        })
    }

    /// Resolve an `InsertOutcome::ReplaceCandidate` after probing the incumbent.
    ///
    /// If `incumbent_responded` is `true`, the newcomer is dropped and the incumbent is
    /// moved to the most-recently-seen slot. Otherwise, the incumbent is evicted and the
    /// newcomer is inserted at the most-recently-seen slot.
    pub async fn resolve_replacement(
        &self,
        incumbent_id: NodeId,
        incumbent_responded: bool,
        newcomer_id: NodeId,
        newcomer_metadata: PeerMetadata,
    ) {
        let Some(bucket_index) = self.bucket_index_for(&incumbent_id) else {
            return;
        };
        let mut buckets = self.buckets.write().await;
        let bucket = &mut buckets.order[bucket_index];

        if incumbent_responded {
            if let Some(pos) = bucket.iter().position(|id| *id == incumbent_id) {
                bucket.remove(pos);
                bucket.push_back(incumbent_id);
            }
            debug!(%incumbent_id, "incumbent responded to probe, newcomer dropped");
        } else {
            if let Some(pos) = bucket.iter().position(|id| *id == incumbent_id) {
                bucket.remove(pos);
            }
            buckets.metadata.remove(&incumbent_id);
            bucket.push_back(newcomer_id);
            buckets.metadata.insert(newcomer_id, newcomer_metadata);
            debug!(%incumbent_id, %newcomer_id, "incumbent evicted, newcomer admitted");
        }
    }

    /// Remove a peer from the table entirely, if present.
    pub async fn remove(&self, peer_id: &NodeId) {
        let Some(bucket_index) = self.bucket_index_for(peer_id) else {
            return;
        };
        let mut buckets = self.buckets.write().await;
        let bucket = &mut buckets.order[bucket_index];
        if let Some(pos) = bucket.iter().position(|id| id == peer_id) {
            bucket.remove(pos);
            buckets.metadata.remove(peer_id);
        }
    }

    /// Move a peer to the most-recently-seen slot in its bucket and update `last_seen`.
    pub async fn touch(&self, peer_id: &NodeId) {
        let Some(bucket_index) = self.bucket_index_for(peer_id) else {
            return;
        };
        let mut buckets = self.buckets.write().await;
        let bucket = &mut buckets.order[bucket_index];
        if let Some(pos) = bucket.iter().position(|id| id == peer_id) {
            bucket.remove(pos);
            bucket.push_back(*peer_id);
        }
        if let Some(metadata) = buckets.metadata.get_mut(peer_id) {
            metadata.last_seen = Utc::now();
        }
    }

    /// As [`RoutingTable::touch`], additionally recording a round-trip latency sample.
    pub async fn touch_with_rtt(&self, peer_id: &NodeId, rtt_ms: u64) {
        self.touch(peer_id).await;
        let mut buckets = self.buckets.write().await;
        if let Some(metadata) = buckets.metadata.get_mut(peer_id) {
            metadata.rtt_ms = Some(rtt_ms);
        }
    }

    /// The `count` peers closest to `target` by XOR distance, ascending.
    ///
    /// Ties are broken by `last_seen` descending (fresher peers first), then by `NodeId`
    /// ascending, matching §4.2's deterministic tie-break rule.
    pub async fn closest(&self, target: &NodeId, count: usize) -> Vec<PeerRecord> {
        let buckets = self.buckets.read().await;
        let mut all: Vec<PeerRecord> = buckets
            .order
            .iter()
            .flatten()
            .filter_map(|id| {
                buckets.metadata.get(id).map(|metadata| PeerRecord {
                    node_id: *id,
                    metadata: metadata.clone(),
                })
            })
            .collect();

        all.sort_by(|a, b| {
            let distance_a = target.xor(&a.node_id);
            let distance_b = target.xor(&b.node_id);
            distance_a
                .cmp(&distance_b)
                .then_with(|| b.metadata.last_seen.cmp(&a.metadata.last_seen))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        all.truncate(count);
        all
    }

    /// A specific peer's current record, if the table holds one.
    pub async fn get(&self, peer_id: &NodeId) -> Option<PeerRecord> {
        let buckets = self.buckets.read().await;
        buckets.metadata.get(peer_id).map(|metadata| PeerRecord {
            node_id: *peer_id,
            metadata: metadata.clone(),
        })
    }

    /// All peers currently in the table, in no particular order.
    pub async fn all(&self) -> Vec<PeerRecord> {
        let buckets = self.buckets.read().await;
        buckets
            .order
            .iter()
            .flatten()
            .filter_map(|id| {
                buckets.metadata.get(id).map(|metadata| PeerRecord {
                    node_id: *id,
                    metadata: metadata.clone(),
                })
            })
            .collect()
    }

    /// The number of peers currently in a given bucket, by bucket index.
    pub async fn bucket_len(&self, bucket_index: usize) -> usize {
        let buckets = self.buckets.read().await;
        buckets
            .order
            .get(bucket_index)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// The indices of every non-empty bucket, used by maintenance to pick a random id to
    /// refresh per bucket.
    pub async fn non_empty_bucket_indices(&self) -> Vec<usize> {
        let buckets = self.buckets.read().await;
        buckets
            .order
            .iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Total number of peers across all buckets.
    pub async fn len(&self) -> usize {
        let buckets = self.buckets.read().await;
        buckets.metadata.len()
    }

    /// Whether the table currently holds no peers.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::NodeKind;
    use std::collections::HashSet;

    fn server_metadata() -> PeerMetadata {
        PeerMetadata::new(
            NodeKind::Server,
            vec!["wss://example.invalid/".parse().unwrap()],
            None,
            HashSet::new(),
            None,
            "1",
            "test-build",
        )
        .expect("valid metadata")
    }

    fn peer_id_in_same_bucket_as(local: &NodeId, bucket_index: u32, salt: u8) -> NodeId {
        // Flip the bit at `bucket_index` from the local id's corresponding bit and vary a
        // trailing byte by `salt` so distinct peers land in the same bucket but are
        // distinct ids.
        let mut bytes = *local.as_bytes();
        let byte_index = (bucket_index / 8) as usize;
        let bit_in_byte = 7 - (bucket_index % 8);
        bytes[byte_index] ^= 1 << bit_in_byte;
        bytes[19] ^= salt;
        NodeId::from_bytes(bytes)
    }

    #[tokio::test]
    async fn s3_routing_admission_replacement_cycle() {
        let local = NodeId::from_bytes([0u8; 20]);
        let table = RoutingTable::with_bucket_size(local, 2);

        let peer_a = peer_id_in_same_bucket_as(&local, 5, 1);
        let peer_b = peer_id_in_same_bucket_as(&local, 5, 2);
        let peer_c = peer_id_in_same_bucket_as(&local, 5, 3);

        assert_eq!(
            table.insert(peer_a, server_metadata()).await,
            InsertOutcome::Inserted
        );
        assert_eq!(
            table.insert(peer_b, server_metadata()).await,
            InsertOutcome::Inserted
        );

        let outcome = table.insert(peer_c, server_metadata()).await;
        let incumbent = match outcome {
            InsertOutcome::ReplaceCandidate(incumbent) => incumbent,
            other => panic!("expected ReplaceCandidate, got {other:?}"),
        };
        assert_eq!(incumbent.node_id, peer_a);

        table
            .resolve_replacement(peer_a, false, peer_c, server_metadata())
            .await;

        assert_eq!(table.len().await, 2);
        let all_ids: HashSet<NodeId> = table.all().await.into_iter().map(|r| r.node_id).collect();
        assert!(all_ids.contains(&peer_b));
        assert!(all_ids.contains(&peer_c));
        assert!(!all_ids.contains(&peer_a));
    }

    #[tokio::test]
    async fn incumbent_surviving_probe_keeps_bucket_full_and_drops_newcomer() {
        let local = NodeId::from_bytes([0u8; 20]);
        let table = RoutingTable::with_bucket_size(local, 1);
        let peer_a = peer_id_in_same_bucket_as(&local, 3, 1);
        let peer_b = peer_id_in_same_bucket_as(&local, 3, 2);

        table.insert(peer_a, server_metadata()).await;
        let outcome = table.insert(peer_b, server_metadata()).await;
        assert!(matches!(outcome, InsertOutcome::ReplaceCandidate(_)));

        table
            .resolve_replacement(peer_a, true, peer_b, server_metadata())
            .await;

        let ids: Vec<NodeId> = table.all().await.into_iter().map(|r| r.node_id).collect();
        assert_eq!(ids, vec![peer_a]);
    }

    #[tokio::test]
    async fn self_insertion_is_rejected() {
        let local = NodeId::from_bytes([1u8; 20]);
        let table = RoutingTable::new(local);
        assert_eq!(
            table.insert(local, server_metadata()).await,
            InsertOutcome::RejectedSelf
        );
    }

    #[tokio::test]
    async fn closest_orders_by_xor_distance_ascending() {
        let local = NodeId::from_bytes([0u8; 20]);
        let table = RoutingTable::new(local);

        let near = peer_id_in_same_bucket_as(&local, 159, 1);
        let far = peer_id_in_same_bucket_as(&local, 0, 1);

        table.insert(near, server_metadata()).await;
        table.insert(far, server_metadata()).await;

        let closest = table.closest(&local, 2).await;
        assert_eq!(closest[0].node_id, near);
        assert_eq!(closest[1].node_id, far);
    }

    #[tokio::test]
    async fn touch_moves_entry_to_most_recently_seen_slot() {
        let local = NodeId::from_bytes([0u8; 20]);
        let table = RoutingTable::with_bucket_size(local, 3);
        let a = peer_id_in_same_bucket_as(&local, 10, 1);
        let b = peer_id_in_same_bucket_as(&local, 10, 2);

        table.insert(a, server_metadata()).await;
        table.insert(b, server_metadata()).await;
        table.touch(&a).await;

        // After touching `a`, it is now the most-recently-seen, so `b` is the next
        // eviction candidate once the bucket fills.
        let c = peer_id_in_same_bucket_as(&local, 10, 3);
        let table = RoutingTable::with_bucket_size(local, 2);
        table.insert(a, server_metadata()).await;
        table.insert(b, server_metadata()).await;
        table.touch(&a).await;
        let outcome = table.insert(c, server_metadata()).await;
        match outcome {
            InsertOutcome::ReplaceCandidate(incumbent) => assert_eq!(incumbent.node_id, b),
            other => panic!("expected ReplaceCandidate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_peer_and_some_after_insert() {
        let local = NodeId::from_bytes([0u8; 20]);
        let table = RoutingTable::new(local);
        let peer = peer_id_in_same_bucket_as(&local, 50, 1);

        assert!(table.get(&peer).await.is_none());
        table.insert(peer, server_metadata()).await;
        let record = table.get(&peer).await.expect("peer was just inserted");
        assert_eq!(record.node_id, peer);
    }
}
