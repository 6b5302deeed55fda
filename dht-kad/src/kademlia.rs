// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! [`Kademlia`]: the component that owns every peer's [`TransportManager`], the routing
//! table, and the local value store, and drives iterative lookups and mesh maintenance
//! over them (§4.2, §4.8, §4.9).
//!
//! `Inner` is constructed with [`Arc::new_cyclic`] so it can hand out a [`WeakHandle`] of
//! itself to anything it owns — a manager's [`SignalRelay`], the listener's
//! [`InboundAccept`] — without that object holding a strong reference back (§9: "break
//! cyclic references" redesign guidance). `WeakHandle` upgrades only for the duration of
//! one call; the query engine's [`LookupContact`] is implemented directly on `Inner` since
//! callers there only ever hold it for the lifetime of a single lookup.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dht_bootstrap::{BootstrapClient, BootstrapEvent, LinkState};
use dht_build_info::PROTOCOL_VERSION;
use dht_id::NodeId;
use dht_routing::{InsertOutcome, NodeKind, PeerMetadata, PeerRecord, RoutingTable};
use dht_transport::{
    DhtError, Envelope, FramePayload, InboundAccept, SignalRelay, TransportEvent, TransportFactory,
    TransportManager, WebSocketManager, WireMetadata, WireNode,
};
use rand::{Rng, RngCore, SeedableRng};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, instrument, trace, warn};

use crate::config::KadConfig;
use crate::error::{KadError, Result};
use crate::query::{self, FindValueOutcome, LookupContact};
use crate::rate_limit::FindNodeRateLimiter;
use crate::store::ValueStore;

struct Inner {
    self_ref: Weak<Inner>,
    local_id: NodeId,
    config: KadConfig,
    routing_table: RoutingTable,
    store: ValueStore,
    rate_limiter: FindNodeRateLimiter,
    factory: TransportFactory,
    bootstrap: Arc<BootstrapClient>,
    managers: RwLock<HashMap<NodeId, Arc<dyn TransportManager>>>,
    metadata_provider: Box<dyn Fn() -> PeerMetadata + Send + Sync>,
}

impl Inner {
    fn arc(&self) -> Arc<Inner> {
        self.self_ref
            .upgrade()
            .expect("Inner only ever runs while a Kademlia handle keeps it alive")
    }

    fn local_metadata(&self) -> PeerMetadata {
        (self.metadata_provider)()
    }

    /// Reuse an already-open manager for `peer`, or build and wire up a fresh one (§4.10:
    /// no cross-call manager cache, one manager per currently-connected peer).
    async fn ensure_manager(&self, peer: NodeId, remote_metadata: PeerMetadata) -> Result<Arc<dyn TransportManager>> {
        if let Some(manager) = self.managers.read().await.get(&peer).cloned() {
            if manager.is_open().await {
                return Ok(manager);
            }
        }

        let relay: Arc<dyn SignalRelay> = Arc::new(WeakHandle(self.self_ref.clone()));
        let manager = self.factory.build(peer, &remote_metadata, self.local_metadata(), relay);
        self.managers.write().await.insert(peer, manager.clone());
        if let Some(events) = manager.take_events() {
            tokio::spawn(pump_manager_events(self.arc(), manager.clone(), events));
        }
        manager.open(true, remote_metadata).await?;
        Ok(manager)
    }

    /// Admit a freshly-connected peer into the routing table, probing the incumbent before
    /// evicting it when its bucket is full (§4.2).
    async fn admit(&self, peer: NodeId, metadata: PeerMetadata) {
        match self.routing_table.insert(peer, metadata.clone()).await {
            InsertOutcome::Inserted | InsertOutcome::RejectedSelf => {}
            InsertOutcome::ReplaceCandidate(incumbent) => {
                let responded = match self.managers.read().await.get(&incumbent.node_id).cloned() {
                    Some(manager) => manager.ping().await.succeeded(),
                    None => false,
                };
                self.routing_table
                    .resolve_replacement(incumbent.node_id, responded, peer, metadata)
                    .await;
            }
        }
    }
}

impl Inner {
    async fn relay(&self, peer: NodeId, payload: FramePayload) -> dht_transport::Result<()> {
        if let Some(manager) = self.managers.read().await.get(&peer).cloned() {
            if manager.is_open().await {
                return manager.send(payload).await;
            }
        }
        self.bootstrap
            .relay_signal(peer, payload)
            .await
            .map_err(|err| DhtError::Transport(err.to_string()))
    }

    async fn accept_inbound(&self, peer: NodeId, remote_metadata: PeerMetadata) -> Option<Arc<WebSocketManager>> {
        if let Some(existing) = self.managers.read().await.get(&peer) {
            if existing.is_open().await {
                return None;
            }
        }
        let relay: Arc<dyn SignalRelay> = Arc::new(WeakHandle(self.self_ref.clone()));
        let manager = self.factory.build_websocket(peer, self.local_metadata(), relay);
        self.managers.write().await.insert(peer, manager.clone());
        if let Some(events) = manager.take_events() {
            tokio::spawn(pump_manager_events(self.arc(), manager.clone(), events));
        }
        Some(manager)
    }
}

/// A weak-only handle to [`Inner`], handed to anything `Inner` itself owns (a manager it
/// built, the WebSocket listener inside its own [`TransportFactory`]) so that object never
/// holds a strong reference back to `Inner` (§9: arena-plus-index, no `Arc` cycle — only
/// [`Inner::arc`] ever upgrades a weak reference, and only for the duration of one call).
struct WeakHandle(Weak<Inner>);

impl WeakHandle {
    fn upgrade(&self) -> dht_transport::Result<Arc<Inner>> {
        self.0
            .upgrade()
            .ok_or_else(|| DhtError::Closed("kademlia layer shut down".to_string()))
    }
}

#[async_trait::async_trait]
impl SignalRelay for WeakHandle {
    async fn relay(&self, peer: NodeId, payload: FramePayload) -> dht_transport::Result<()> {
        self.upgrade()?.relay(peer, payload).await
    }
}

#[async_trait::async_trait]
impl InboundAccept for WeakHandle {
    async fn accept(&self, peer: NodeId, remote_metadata: PeerMetadata) -> Option<Arc<WebSocketManager>> {
        self.upgrade().ok()?.accept_inbound(peer, remote_metadata).await
    }
}

#[async_trait::async_trait]
impl LookupContact for Inner {
    async fn find_node(&self, candidate: &PeerRecord, target: NodeId) -> Result<Vec<(NodeId, PeerMetadata)>> {
        let mut attempt = 1;
        loop {
            match self.probe_find_node(candidate, target).await {
                Ok(nodes) => return Ok(nodes),
                Err(err) if attempt < self.config.max_attempts => {
                    trace!(peer = %candidate.node_id, %err, attempt, "find_node probe failed, retrying");
                    tokio::time::sleep(retry_delay(self.config.retry_base_delay, attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        peer = %candidate.node_id,
                        %err,
                        attempts = attempt,
                        "find_node probe exhausted retries, marking peer unresponsive"
                    );
                    self.routing_table.remove(&candidate.node_id).await;
                    return Err(err);
                }
            }
        }
    }

    async fn find_value(&self, candidate: &PeerRecord, key: &str) -> Result<(Option<String>, Vec<(NodeId, PeerMetadata)>)> {
        let mut attempt = 1;
        loop {
            match self.probe_find_value(candidate, key).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if attempt < self.config.max_attempts => {
                    trace!(peer = %candidate.node_id, %err, attempt, "find_value probe failed, retrying");
                    tokio::time::sleep(retry_delay(self.config.retry_base_delay, attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        peer = %candidate.node_id,
                        %err,
                        attempts = attempt,
                        "find_value probe exhausted retries, marking peer unresponsive"
                    );
                    self.routing_table.remove(&candidate.node_id).await;
                    return Err(err);
                }
            }
        }
    }
}

impl Inner {
    /// A single, unretried `find_node` round-trip to `candidate`. Callers retry this
    /// per §4.9; kept separate so the retry loop above stays free of the rate-limiter and
    /// request-framing details.
    async fn probe_find_node(&self, candidate: &PeerRecord, target: NodeId) -> Result<Vec<(NodeId, PeerMetadata)>> {
        let guard = self
            .rate_limiter
            .try_acquire(candidate.node_id)
            .await
            .ok_or_else(|| KadError::RateLimited(candidate.node_id.to_hex()))?;

        let manager = self.ensure_manager(candidate.node_id, candidate.metadata.clone()).await?;
        let request_id = dht_transport::RequestId::new().as_str().to_string();
        let reply = manager
            .request(
                FramePayload::FindNode {
                    target: target.to_hex(),
                    request_id,
                },
                self.config.query_timeout,
            )
            .await;
        guard.release().await;

        match reply?.payload {
            FramePayload::FindNodeResponse { nodes, .. } => Ok(wire_to_nodes(nodes)),
            other => Err(KadError::Protocol(format!("unexpected reply to find_node: {other:?}"))),
        }
    }

    /// A single, unretried `find_value` round-trip to `candidate`.
    async fn probe_find_value(&self, candidate: &PeerRecord, key: &str) -> Result<(Option<String>, Vec<(NodeId, PeerMetadata)>)> {
        let manager = self.ensure_manager(candidate.node_id, candidate.metadata.clone()).await?;
        let request_id = dht_transport::RequestId::new().as_str().to_string();
        let reply = manager
            .request(
                FramePayload::FindValue {
                    key: key.to_string(),
                    request_id,
                },
                self.config.query_timeout,
            )
            .await?;

        match reply.payload {
            FramePayload::FindValueResponse { value, nodes, .. } => Ok((value, wire_to_nodes(nodes))),
            other => Err(KadError::Protocol(format!("unexpected reply to find_value: {other:?}"))),
        }
    }
}

/// The delay before retry number `attempt` (1-indexed) of a failed probe: `base` doubled per
/// attempt and jittered by up to ±20%, the same jitter shape `dht_bootstrap::BackoffIter`
/// uses for reconnects (§4.9).
fn retry_delay(base: std::time::Duration, attempt: u32) -> std::time::Duration {
    let scaled_ms = base.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
    let jitter = (scaled_ms as f64 * 0.2) as i64;
    let delta = if jitter == 0 {
        0
    } else {
        rand::thread_rng().gen_range(-jitter..=jitter)
    };
    std::time::Duration::from_millis((scaled_ms as i64 + delta).max(0) as u64)
}

fn wire_to_nodes(nodes: Vec<WireNode>) -> Vec<(NodeId, PeerMetadata)> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let Ok(node_id) = NodeId::from_hex(&node.node_id) else {
            warn!(node_id = %node.node_id, "peer reported an unparsable node id");
            continue;
        };
        match PeerMetadata::try_from(node.metadata) {
            Ok(metadata) => out.push((node_id, metadata)),
            Err(err) => warn!(%err, %node_id, "peer reported unusable metadata"),
        }
    }
    out
}

fn nodes_to_wire(records: &[PeerRecord]) -> Vec<WireNode> {
    records
        .iter()
        .map(|record| WireNode {
            node_id: record.node_id.to_hex(),
            metadata: WireMetadata::from(&record.metadata),
        })
        .collect()
}

/// The Kademlia layer's public handle: a cheap, cloneable reference to the shared DHT
/// state for this node.
#[derive(Clone)]
pub struct Kademlia {
    inner: Arc<Inner>,
}

impl Kademlia {
    /// Build a Kademlia handle over an already-constructed routing table, transport
    /// factory, and bootstrap client. `metadata_provider` is polled fresh on every new
    /// connection this layer opens, mirroring [`BootstrapClient::new`]'s contract.
    pub fn new(
        local_id: NodeId,
        config: KadConfig,
        routing_table: RoutingTable,
        factory: TransportFactory,
        bootstrap: Arc<BootstrapClient>,
        metadata_provider: impl Fn() -> PeerMetadata + Send + Sync + 'static,
    ) -> Self {
        let rate_limiter = FindNodeRateLimiter::new(config.find_node_min_spacing);
        let inner = Arc::new_cyclic(|self_ref| Inner {
            self_ref: self_ref.clone(),
            local_id,
            config,
            routing_table,
            store: ValueStore::new(),
            rate_limiter,
            factory,
            bootstrap,
            managers: RwLock::new(HashMap::new()),
            metadata_provider: Box::new(metadata_provider),
        });
        Self { inner }
    }

    /// This node's own id.
    pub fn local_id(&self) -> NodeId {
        self.inner.local_id
    }

    /// The routing table backing this layer.
    pub fn routing_table(&self) -> &RoutingTable {
        &self.inner.routing_table
    }

    /// An [`InboundAccept`] handle suitable for [`dht_transport::WebSocketListener::serve`].
    ///
    /// Weak-backed (§9: no `Arc` cycle) so the listener's long-running `serve()` task never
    /// keeps this `Kademlia` instance alive on its own.
    pub fn inbound_acceptor(&self) -> Arc<dyn InboundAccept> {
        Arc::new(WeakHandle(Arc::downgrade(&self.inner)))
    }

    /// Start the background bootstrap-event pump and periodic maintenance loops. Safe to
    /// call once per process; calling it twice spawns duplicate maintenance loops.
    pub async fn spawn(&self) {
        if let Some(events) = self.inner.bootstrap.take_events() {
            tokio::spawn(run_bootstrap_event_loop(self.inner.clone(), events));
        }
        tokio::spawn(run_bucket_refresh_loop(self.inner.clone()));
        tokio::spawn(run_sweep_loop(self.inner.clone()));
    }

    /// Join the mesh: ask the bootstrap link for a peer set (or genesis status) and seed
    /// the routing table with it (§4.8 bullet 2).
    #[instrument(skip(self))]
    pub async fn bootstrap_into_mesh(&self, max_peers: usize) -> Result<bool> {
        let result = self
            .inner
            .bootstrap
            .get_peers_or_genesis(max_peers)
            .await
            .map_err(|err| KadError::Protocol(err.to_string()))?;

        for (peer, metadata) in result.peers {
            self.inner.routing_table.insert(peer, metadata).await;
        }
        Ok(result.is_genesis)
    }

    /// Ping a specific peer, opening a connection first if none is open.
    pub async fn ping(&self, peer: NodeId, remote_metadata: PeerMetadata) -> Result<bool> {
        let manager = self.inner.ensure_manager(peer, remote_metadata).await?;
        let outcome = manager.ping().await;
        if outcome.succeeded() {
            if let dht_transport::PingOutcome::Success { rtt_ms } = outcome {
                self.inner.routing_table.touch_with_rtt(&peer, rtt_ms).await;
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Drive an iterative `find_node` lookup for `target` (§4.2).
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<PeerRecord>> {
        let contact: Arc<dyn LookupContact> = self.inner.clone();
        let k = self.inner.routing_table.bucket_size();
        query::find_node(contact, &self.inner.routing_table, target, k, self.inner.config.concurrency).await
    }

    /// Drive an iterative `find_value` lookup for `key` (§4.9).
    pub async fn find_value(&self, key: &str) -> Result<FindValueOutcome> {
        if let Some(value) = self.inner.store.get(key).await {
            return Ok(FindValueOutcome::Found(value));
        }
        let contact: Arc<dyn LookupContact> = self.inner.clone();
        let k = self.inner.routing_table.bucket_size();
        query::find_value(contact, &self.inner.routing_table, key, k, self.inner.config.concurrency).await
    }

    /// Store a value locally and push it out to the `k` nodes closest to its key (§4.9).
    #[instrument(skip(self, value))]
    pub async fn store(&self, key: String, value: String) -> Result<()> {
        self.inner.store.put(key.clone(), value.clone()).await;

        let target = NodeId::from_public_key(key.as_bytes());
        let closest = self.find_node(target).await.unwrap_or_default();

        for record in closest {
            let manager = match self.inner.ensure_manager(record.node_id, record.metadata.clone()).await {
                Ok(manager) => manager,
                Err(err) => {
                    trace!(peer = %record.node_id, %err, "could not reach peer while replicating store");
                    continue;
                }
            };
            let request_id = dht_transport::RequestId::new().as_str().to_string();
            if let Err(err) = manager
                .request(
                    FramePayload::Store {
                        key: key.clone(),
                        value: value.clone(),
                        request_id,
                    },
                    self.inner.config.query_timeout,
                )
                .await
            {
                trace!(peer = %record.node_id, %err, "store replication to peer failed");
            }
        }
        Ok(())
    }
}

async fn pump_manager_events(inner: Arc<Inner>, manager: Arc<dyn TransportManager>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    let peer = manager.peer();
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::PeerConnected { peer } => {
                if let Some(metadata) = manager.metadata().await {
                    inner.admit(peer, metadata).await;
                } else {
                    warn!(%peer, "peer-connected event fired with no adopted metadata");
                }
            }
            TransportEvent::PeerDisconnected { peer, reason } => {
                debug!(%peer, %reason, "peer disconnected");
                inner.routing_table.remove(&peer).await;
                inner.managers.write().await.remove(&peer);
            }
            TransportEvent::DhtMessage { peer, envelope } => {
                handle_dht_request(&inner, &manager, peer, envelope).await;
            }
            TransportEvent::Signal { peer, envelope } => {
                handle_signal(&inner, peer, envelope.payload).await;
            }
            TransportEvent::Pong { peer, rtt_ms } => {
                inner.routing_table.touch_with_rtt(&peer, rtt_ms).await;
            }
        }
    }
    trace!(%peer, "manager event stream closed");
}

async fn handle_dht_request(inner: &Arc<Inner>, manager: &Arc<dyn TransportManager>, peer: NodeId, envelope: Envelope) {
    let payload = match envelope.payload {
        FramePayload::FindNode { target, request_id } => {
            let Ok(target_id) = NodeId::from_hex(&target) else {
                warn!(%peer, %target, "find_node request carried an unparsable target");
                return;
            };
            let k = inner.routing_table.bucket_size();
            let closest = inner.routing_table.closest(&target_id, k).await;
            FramePayload::FindNodeResponse {
                nodes: nodes_to_wire(&closest),
                request_id,
            }
        }
        FramePayload::FindValue { key, request_id } => match inner.store.get(&key).await {
            Some(value) => FramePayload::FindValueResponse {
                value: Some(value),
                nodes: Vec::new(),
                request_id,
            },
            None => {
                let target_id = NodeId::from_public_key(key.as_bytes());
                let k = inner.routing_table.bucket_size();
                let closest = inner.routing_table.closest(&target_id, k).await;
                FramePayload::FindValueResponse {
                    value: None,
                    nodes: nodes_to_wire(&closest),
                    request_id,
                }
            }
        },
        FramePayload::Store { key, value, request_id } => {
            inner.store.put(key, value).await;
            FramePayload::StoreResponse { ok: true, request_id }
        }
        other => {
            trace!(%peer, payload = ?other.request_id(), "ignoring unrecognized dht message");
            return;
        }
    };

    if let Err(err) = manager.send(payload).await {
        warn!(%peer, %err, "failed to answer dht request");
    }
}

/// Route a signaling frame addressed to `peer` (forwarded verbatim from that peer's own
/// manager, or relayed through the bootstrap link) to the manager negotiating with them
/// (§4.9). Multi-hop relaying to a third party is out of this layer's scope.
async fn handle_signal(inner: &Arc<Inner>, peer: NodeId, payload: FramePayload) {
    match payload {
        FramePayload::ConnectionRequest {
            listening_address,
            capabilities,
        } => {
            let Ok(url) = url::Url::parse(&listening_address) else {
                warn!(%peer, %listening_address, "connection_request carried an unparsable address");
                return;
            };
            let hint = match inner.routing_table.get(&peer).await {
                Some(record) => PeerMetadata {
                    listening_addresses: vec![url],
                    ..record.metadata
                },
                None => match PeerMetadata::new(
                    NodeKind::Server,
                    vec![url],
                    None,
                    capabilities.into_iter().collect(),
                    None,
                    PROTOCOL_VERSION,
                    "unknown",
                ) {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        warn!(%peer, %err, "could not build a dial hint from connection_request");
                        return;
                    }
                },
            };
            if let Err(err) = inner.ensure_manager(peer, hint).await {
                warn!(%peer, %err, "reverse dial in response to connection_request failed");
            }
        }
        offer @ (FramePayload::ConnectionOffer { .. }
        | FramePayload::ConnectionAnswer { .. }
        | FramePayload::ConnectionCandidate { .. }) => {
            let manager: Arc<dyn TransportManager> = match inner.managers.read().await.get(&peer).cloned() {
                Some(manager) => manager,
                None => {
                    let relay: Arc<dyn SignalRelay> = Arc::new(WeakHandle(Arc::downgrade(inner)));
                    let manager: Arc<dyn TransportManager> = inner.factory.build_webrtc(peer, inner.local_metadata(), relay);
                    inner.managers.write().await.insert(peer, manager.clone());
                    if let Some(events) = manager.take_events() {
                        tokio::spawn(pump_manager_events(inner.clone(), manager.clone(), events));
                    }
                    manager
                }
            };
            if let Err(err) = manager.handle_signal(offer).await {
                warn!(%peer, %err, "failed to apply relayed signal");
            }
        }
        other => {
            trace!(%peer, payload = ?other.request_id(), "ignoring unrecognized signal frame");
        }
    }
}

async fn run_bootstrap_event_loop(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<BootstrapEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            BootstrapEvent::LinkStateChanged(state) => {
                debug!(?state, "bootstrap link state changed");
                if matches!(state, LinkState::Connected) {
                    let max_peers = inner.routing_table.bucket_size();
                    if let Ok(result) = inner.bootstrap.get_peers_or_genesis(max_peers).await {
                        for (peer, metadata) in result.peers {
                            inner.routing_table.insert(peer, metadata).await;
                        }
                    }
                }
            }
            BootstrapEvent::InvitationReceived { inviter } => {
                debug!(%inviter, "received bridge invitation");
            }
            BootstrapEvent::SignalReceived { from, payload } => {
                handle_signal(&inner, from, payload).await;
            }
        }
    }
}

async fn run_bucket_refresh_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.bucket_refresh_interval);
    loop {
        ticker.tick().await;
        for bucket_index in inner.routing_table.non_empty_bucket_indices().await {
            let target = random_id_in_bucket(inner.local_id, bucket_index);
            let contact: Arc<dyn LookupContact> = inner.clone();
            let k = inner.routing_table.bucket_size();
            if let Err(err) = query::find_node(contact, &inner.routing_table, target, k, inner.config.concurrency).await {
                trace!(bucket_index, %err, "bucket refresh lookup failed");
            }
        }
    }
}

async fn run_sweep_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.sweep_interval);
    loop {
        ticker.tick().await;
        let peers = inner.routing_table.all().await;
        for record in peers {
            let Some(manager) = inner.managers.read().await.get(&record.node_id).cloned() else {
                continue;
            };
            let outcome = manager.ping().await;
            match outcome {
                dht_transport::PingOutcome::Success { rtt_ms } => {
                    inner.routing_table.touch_with_rtt(&record.node_id, rtt_ms).await;
                }
                dht_transport::PingOutcome::InactiveTab => {}
                dht_transport::PingOutcome::Failed { .. } => {
                    inner.routing_table.remove(&record.node_id).await;
                    inner.managers.write().await.remove(&record.node_id);
                }
            }
        }
    }
}

/// Pick a random id that falls in bucket `bucket_index` relative to `local_id`: flip the
/// bit that determines that bucket and randomize everything less significant (§4.2
/// maintenance: "one random id per non-empty bucket").
fn random_id_in_bucket(local_id: NodeId, bucket_index: usize) -> NodeId {
    let mut bytes = *local_id.as_bytes();
    let byte_index = bucket_index / 8;
    let bit_in_byte = 7 - (bucket_index % 8);
    bytes[byte_index] ^= 1 << bit_in_byte;

    let mut rng = rand::rngs::SmallRng::from_entropy();
    for byte in bytes.iter_mut().skip(byte_index + 1) {
        *byte = rng.next_u32() as u8;
    }
    NodeId::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dht_bootstrap::BootstrapConfig;
    use dht_identity::Identity;
    use dht_transport::{AlwaysVisible, TransportConfig};
    use std::collections::HashSet;

    fn server_metadata() -> PeerMetadata {
        PeerMetadata::new(
            NodeKind::Server,
            vec!["wss://local.example.invalid/".parse().unwrap()],
            None,
            HashSet::new(),
            None,
            PROTOCOL_VERSION,
            "test-build",
        )
        .unwrap()
    }

    fn build_kademlia() -> Kademlia {
        let local_id = NodeId::from_public_key(b"kademlia-test");
        let routing_table = RoutingTable::new(local_id);
        let factory = TransportFactory::new(
            local_id,
            NodeKind::Server,
            TransportConfig::default(),
            Arc::new(AlwaysVisible::default()),
            None,
        );
        let bootstrap = Arc::new(BootstrapClient::new(
            local_id,
            Identity::generate(),
            BootstrapConfig::default(),
            server_metadata,
        ));
        Kademlia::new(local_id, KadConfig::default(), routing_table, factory, bootstrap, server_metadata)
    }

    #[tokio::test]
    async fn find_node_with_no_known_peers_fails_fast() {
        let kademlia = build_kademlia();
        let err = kademlia.find_node(NodeId::from_public_key(b"target")).await.unwrap_err();
        assert!(matches!(err, KadError::NoPeers));
    }

    #[tokio::test]
    async fn store_then_find_value_is_served_locally_without_peers() {
        let kademlia = build_kademlia();
        kademlia.store("key".to_string(), "value".to_string()).await.unwrap();
        let outcome = kademlia.find_value("key").await.unwrap();
        assert_eq!(outcome, FindValueOutcome::Found("value".to_string()));
    }

    #[tokio::test]
    async fn find_value_for_unknown_key_with_no_peers_fails() {
        let kademlia = build_kademlia();
        let err = kademlia.find_value("missing").await.unwrap_err();
        assert!(matches!(err, KadError::NoPeers));
    }

    #[test]
    fn retry_delay_doubles_per_attempt_and_stays_within_jitter() {
        let base = std::time::Duration::from_millis(250);
        for attempt in 1..=3 {
            let expected_ms = 250u64 * 2u64.pow(attempt - 1);
            let bound = (expected_ms as f64 * 0.2) as i64;
            for _ in 0..20 {
                let ms = retry_delay(base, attempt).as_millis() as i64;
                assert!(
                    (expected_ms as i64 - bound..=expected_ms as i64 + bound).contains(&ms),
                    "attempt {attempt}: {ms}ms out of range around {expected_ms}ms"
                );
            }
        }
    }

    #[test]
    fn random_id_in_bucket_flips_the_expected_bit() {
        let local = NodeId::from_bytes([0u8; 20]);
        let random = random_id_in_bucket(local, 5);
        let distance = local.xor(&random);
        assert_eq!(distance.leading_zero_bits(), 5);
    }

    #[tokio::test]
    async fn weak_handle_outlives_nothing_once_kademlia_is_dropped() {
        let kademlia = build_kademlia();
        let relay = kademlia.inner.clone();
        let handle: Arc<dyn InboundAccept> = kademlia.inbound_acceptor();
        drop(kademlia);
        drop(relay);
        let accepted = handle
            .accept(NodeId::from_public_key(b"late"), server_metadata())
            .await;
        assert!(accepted.is_none(), "a dropped Kademlia must not keep Inner alive");
    }
}
