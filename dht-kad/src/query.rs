// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! The iterative `find_node`/`find_value` lookup engine (§4.2, §4.9).
//!
//! This is a standard Kademlia iterative lookup: α candidates are queried concurrently out
//! of a shortlist ordered by XOR distance to the target, newly-learned peers are folded
//! back into the shortlist, and the lookup terminates once a round brings no peer closer
//! than the best already known. There is no libp2p-swarm event loop underneath this — each
//! round is a bounded batch of [`tokio::task::JoinSet`] futures, which is all the concurrency
//! this layer needs now that dialing and framing live one layer down in `dht-transport`.

use std::collections::HashSet;
use std::sync::Arc;

use dht_id::NodeId;
use dht_routing::{PeerMetadata, PeerRecord, RoutingTable};
use tokio::task::JoinSet;
use tracing::{instrument, trace};

use crate::error::{KadError, Result};

/// A single contacted candidate's outcome for a `find_node` probe.
type FindNodeReply = Result<Vec<(NodeId, PeerMetadata)>>;

/// A single contacted candidate's outcome for a `find_value` probe: either the value, or
/// (if not held) the candidate's closest known nodes.
type FindValueReply = Result<(Option<String>, Vec<(NodeId, PeerMetadata)>)>;

/// Issues the actual network round-trips an iterative lookup needs. Implemented by
/// [`crate::kademlia::Kademlia`]; kept as a trait here so the lookup algorithm itself has no
/// dependency on connection management, dialing, or rate limiting.
#[async_trait::async_trait]
pub trait LookupContact: Send + Sync {
    /// Ask `candidate` for the nodes closest to `target`.
    async fn find_node(&self, candidate: &PeerRecord, target: NodeId) -> FindNodeReply;

    /// Ask `candidate` for `key`'s value, falling back to its closest known nodes.
    async fn find_value(&self, candidate: &PeerRecord, key: &str) -> FindValueReply;
}

/// A hard backstop on the number of lookup rounds, independent of convergence, so a
/// pathological shortlist (e.g. peers that keep returning each other) cannot loop forever.
const MAX_ROUNDS: usize = dht_id::NODE_ID_BITS as usize;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CandidateState {
    NotContacted,
    Waiting,
    Done,
}

struct Candidate {
    record: PeerRecord,
    state: CandidateState,
}

struct Shortlist {
    target: NodeId,
    limit: usize,
    entries: Vec<Candidate>,
    seen: HashSet<NodeId>,
}

impl Shortlist {
    fn new(target: NodeId, limit: usize, seed: Vec<PeerRecord>) -> Self {
        let mut shortlist = Self {
            target,
            limit,
            entries: Vec::new(),
            seen: HashSet::new(),
        };
        for record in seed {
            shortlist.offer(record);
        }
        shortlist
    }

    fn distance(&self, id: &NodeId) -> NodeId {
        self.target.xor(id)
    }

    /// Fold a newly-learned peer into the shortlist, if it's not already known and the
    /// shortlist has room (or it's closer than the current worst entry).
    fn offer(&mut self, record: PeerRecord) {
        if record.node_id == self.target || !self.seen.insert(record.node_id) {
            return;
        }
        self.entries.push(Candidate {
            record,
            state: CandidateState::NotContacted,
        });
        self.entries.sort_by_key(|c| self.distance(&c.node_id()));
        if self.entries.len() > self.limit {
            let dropped = self.entries.split_off(self.limit);
            for candidate in dropped {
                self.seen.remove(&candidate.record.node_id);
            }
        }
    }

    fn pick_batch(&mut self, alpha: usize) -> Vec<PeerRecord> {
        let mut picked = Vec::new();
        for candidate in &mut self.entries {
            if picked.len() >= alpha {
                break;
            }
            if candidate.state == CandidateState::NotContacted {
                candidate.state = CandidateState::Waiting;
                picked.push(candidate.record.clone());
            }
        }
        picked
    }

    fn mark_done(&mut self, id: &NodeId) {
        if let Some(candidate) = self.entries.iter_mut().find(|c| c.node_id() == *id) {
            candidate.state = CandidateState::Done;
        }
    }

    fn all_contacted(&self) -> bool {
        self.entries
            .iter()
            .all(|c| c.state != CandidateState::NotContacted)
    }

    fn in_flight(&self) -> bool {
        self.entries.iter().any(|c| c.state == CandidateState::Waiting)
    }

    fn best_distance(&self) -> Option<NodeId> {
        self.entries.first().map(|c| self.distance(&c.node_id()))
    }

    fn into_closest(mut self, count: usize) -> Vec<PeerRecord> {
        self.entries.truncate(count);
        self.entries.into_iter().map(|c| c.record).collect()
    }
}

impl Candidate {
    fn node_id(&self) -> NodeId {
        self.record.node_id
    }
}

/// Drive an iterative `find_node` lookup to convergence, returning the `count` closest
/// peers discovered (§4.2).
#[instrument(skip(contact, routing_table), fields(%target))]
pub async fn find_node(
    contact: Arc<dyn LookupContact>,
    routing_table: &RoutingTable,
    target: NodeId,
    count: usize,
    alpha: usize,
) -> Result<Vec<PeerRecord>> {
    let seed = routing_table.closest(&target, count.max(alpha)).await;
    if seed.is_empty() {
        return Err(KadError::NoPeers);
    }
    let mut shortlist = Shortlist::new(target, count, seed);

    for round in 0..MAX_ROUNDS {
        let batch = shortlist.pick_batch(alpha);
        if batch.is_empty() {
            if shortlist.in_flight() {
                // Shouldn't happen: pick_batch only returns NotContacted entries, and we
                // drain every JoinSet fully before the next iteration. Guard anyway.
                continue;
            }
            break;
        }

        let best_before = shortlist.best_distance();
        let mut joinset: JoinSet<(NodeId, FindNodeReply)> = JoinSet::new();
        for candidate in batch {
            let id = candidate.node_id;
            let contact = contact.clone();
            joinset.spawn(async move { (id, contact.find_node(&candidate, target).await) });
        }

        while let Some(joined) = joinset.join_next().await {
            let (id, reply) = joined.map_err(|err| KadError::Protocol(err.to_string()))?;
            shortlist.mark_done(&id);
            match reply {
                Ok(nodes) => {
                    for (node_id, metadata) in nodes {
                        shortlist.offer(PeerRecord { node_id, metadata });
                    }
                }
                Err(err) => {
                    trace!(peer = %id, %err, round, "find_node probe failed");
                }
            }
        }

        if shortlist.all_contacted() {
            let converged = shortlist.best_distance() == best_before;
            if converged {
                break;
            }
        }
    }

    Ok(shortlist.into_closest(count))
}

/// Drive an iterative `find_value` lookup: returns as soon as any contacted peer reports a
/// value, otherwise falls back to the closest nodes found once the lookup converges (§4.9).
#[instrument(skip(contact, routing_table), fields(%key))]
pub async fn find_value(
    contact: Arc<dyn LookupContact>,
    routing_table: &RoutingTable,
    key: &str,
    count: usize,
    alpha: usize,
) -> Result<FindValueOutcome> {
    let target = NodeId::from_public_key(key.as_bytes());
    let seed = routing_table.closest(&target, count.max(alpha)).await;
    if seed.is_empty() {
        return Err(KadError::NoPeers);
    }
    let mut shortlist = Shortlist::new(target, count, seed);
    let key = key.to_string();

    for round in 0..MAX_ROUNDS {
        let batch = shortlist.pick_batch(alpha);
        if batch.is_empty() {
            break;
        }

        let best_before = shortlist.best_distance();
        let mut joinset: JoinSet<(NodeId, FindValueReply)> = JoinSet::new();
        for candidate in batch {
            let id = candidate.node_id;
            let contact = contact.clone();
            let key = key.clone();
            joinset.spawn(async move { (id, contact.find_value(&candidate, &key).await) });
        }

        while let Some(joined) = joinset.join_next().await {
            let (id, reply) = joined.map_err(|err| KadError::Protocol(err.to_string()))?;
            shortlist.mark_done(&id);
            match reply {
                Ok((Some(value), _nodes)) => {
                    return Ok(FindValueOutcome::Found(value));
                }
                Ok((None, nodes)) => {
                    for (node_id, metadata) in nodes {
                        shortlist.offer(PeerRecord { node_id, metadata });
                    }
                }
                Err(err) => {
                    trace!(peer = %id, %err, round, "find_value probe failed");
                }
            }
        }

        if shortlist.all_contacted() && shortlist.best_distance() == best_before {
            break;
        }
    }

    Ok(FindValueOutcome::NotFound(shortlist.into_closest(count)))
}

/// The result of an iterative `find_value` lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindValueOutcome {
    /// A peer along the lookup path held the value.
    Found(String),
    /// No peer held the value; these are the closest nodes found instead.
    NotFound(Vec<PeerRecord>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use dht_routing::NodeKind;
    use std::collections::HashSet as StdHashSet;
    use std::sync::Mutex;

    fn metadata() -> PeerMetadata {
        PeerMetadata::new(
            NodeKind::Server,
            vec!["wss://example.invalid/".parse().unwrap()],
            None,
            StdHashSet::new(),
            None,
            "1",
            "build-1",
        )
        .unwrap()
    }

    fn node(seed: &[u8]) -> NodeId {
        NodeId::from_public_key(seed)
    }

    /// A contact whose network graph is a fixed adjacency map: querying a peer returns
    /// whatever peers that entry is wired to point at.
    struct FakeNetwork {
        graph: std::collections::HashMap<NodeId, Vec<NodeId>>,
        queried: Mutex<Vec<NodeId>>,
    }

    #[async_trait::async_trait]
    impl LookupContact for FakeNetwork {
        async fn find_node(&self, candidate: &PeerRecord, _target: NodeId) -> FindNodeReply {
            self.queried.lock().unwrap().push(candidate.node_id);
            Ok(self
                .graph
                .get(&candidate.node_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|id| (id, metadata()))
                .collect())
        }

        async fn find_value(&self, candidate: &PeerRecord, _key: &str) -> FindValueReply {
            let nodes = self
                .graph
                .get(&candidate.node_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|id| (id, metadata()))
                .collect();
            Ok((None, nodes))
        }
    }

    #[tokio::test]
    async fn find_node_converges_and_returns_closest_known() {
        let local = NodeId::from_bytes([0u8; 20]);
        let target = NodeId::from_bytes([0xffu8; 20]);
        let table = RoutingTable::new(local);

        let a = node(b"a");
        let b = node(b"b");
        let c = node(b"c");
        table.insert(a, metadata()).await;

        let mut graph = std::collections::HashMap::new();
        graph.insert(a, vec![b]);
        graph.insert(b, vec![c]);
        graph.insert(c, vec![]);
        let network: Arc<dyn LookupContact> = Arc::new(FakeNetwork {
            graph,
            queried: Mutex::new(Vec::new()),
        });

        let closest = find_node(network, &table, target, 20, 3).await.unwrap();
        let ids: std::collections::HashSet<NodeId> = closest.into_iter().map(|r| r.node_id).collect();
        assert!(ids.contains(&a));
        assert!(ids.contains(&b));
        assert!(ids.contains(&c));
    }

    #[tokio::test]
    async fn find_node_with_empty_routing_table_fails() {
        let local = NodeId::from_bytes([0u8; 20]);
        let table = RoutingTable::new(local);
        let network: Arc<dyn LookupContact> = Arc::new(FakeNetwork {
            graph: std::collections::HashMap::new(),
            queried: Mutex::new(Vec::new()),
        });
        let err = find_node(network, &table, node(b"target"), 20, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, KadError::NoPeers));
    }

    #[tokio::test]
    async fn find_value_short_circuits_on_first_hit() {
        let local = NodeId::from_bytes([0u8; 20]);
        let table = RoutingTable::new(local);
        let a = node(b"a");
        table.insert(a, metadata()).await;

        struct ValueNetwork;
        #[async_trait::async_trait]
        impl LookupContact for ValueNetwork {
            async fn find_node(&self, _candidate: &PeerRecord, _target: NodeId) -> FindNodeReply {
                Ok(vec![])
            }
            async fn find_value(&self, _candidate: &PeerRecord, _key: &str) -> FindValueReply {
                Ok((Some("hello".to_string()), vec![]))
            }
        }

        let network: Arc<dyn LookupContact> = Arc::new(ValueNetwork);
        let outcome = find_value(network, &table, "some-key", 20, 3).await.unwrap();
        assert_eq!(outcome, FindValueOutcome::Found("hello".to_string()));
    }

    #[tokio::test]
    async fn find_value_falls_back_to_closest_nodes_when_absent() {
        let local = NodeId::from_bytes([0u8; 20]);
        let table = RoutingTable::new(local);
        let a = node(b"a");
        table.insert(a, metadata()).await;

        let network: Arc<dyn LookupContact> = Arc::new(FakeNetwork {
            graph: std::collections::HashMap::new(),
            queried: Mutex::new(Vec::new()),
        });

        let outcome = find_value(network, &table, "some-key", 20, 3).await.unwrap();
        match outcome {
            FindValueOutcome::NotFound(nodes) => {
                assert_eq!(nodes.len(), 1);
                assert_eq!(nodes[0].node_id, a);
            }
            FindValueOutcome::Found(_) => panic!("expected NotFound"),
        }
    }
}
