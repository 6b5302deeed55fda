// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! The `TransportManager` contract (§4.4) and the transport-agnostic plumbing
//! ([`ManagerCore`]) shared by [`crate::ws::WebSocketManager`] and
//! [`crate::rtc::WebRtcManager`].
//!
//! One manager instance owns exactly one connection to exactly one peer (§3, §4.4). The
//! two concrete transports differ only in how they dial/accept and how bytes move over the
//! wire; request/response correlation, the event stream, ping/pong, and glare resolution
//! are identical and live here.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dht_id::NodeId;
use dht_routing::PeerMetadata;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::envelope::{Envelope, FramePayload};
use crate::error::{DhtError, Result};
use crate::event::{DisconnectReason, RequestId, TransportEvent};
use crate::host::HostEnvironment;
use crate::negotiation::{resolve_glare, NegotiationOutcome};
use crate::pending::{await_response, PendingRequests};
use crate::types::{ConnectionDirection, ConnectionState, TransportKind};

/// The result of a [`TransportManager::ping`] call (§4.4, §4.4's inactive-tab filter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    /// The peer answered within the deadline.
    Success {
        /// Measured round-trip time.
        rtt_ms: u64,
    },
    /// The ping was sent but no `pong` arrived in time, or the connection was not open.
    Failed {
        /// A short machine-readable reason.
        reason: String,
    },
    /// The ping was not sent because the peer is a browser with a hidden tab (§4.4).
    InactiveTab,
}

impl PingOutcome {
    /// Whether the outcome should count as a successful keep-alive for routing-table
    /// freshness purposes.
    pub fn succeeded(&self) -> bool {
        matches!(self, PingOutcome::Success { .. })
    }
}

/// Uniform contract every transport implementation exposes (§4.4 table).
///
/// `initialize(local_id)` from the spec's table is folded into construction here: every
/// concrete manager is built by [`crate::factory::TransportFactory`] already carrying the
/// local node id and seed metadata, so there is no separate initialization step to forget
/// or call twice (see DESIGN.md for this Open Question's resolution).
#[async_trait]
pub trait TransportManager: Send + Sync {
    /// The peer this manager is dedicated to.
    fn peer(&self) -> NodeId;

    /// Which concrete transport this manager uses.
    fn kind(&self) -> TransportKind;

    /// Open a connection to the peer, resolving glare per §4.5. `remote_hint` is the best
    /// currently-known metadata for the peer (used to pick a dial address); it is
    /// superseded once the handshake adopts the peer's authoritative metadata. Resolves
    /// once the connection reaches `Open`.
    async fn open(&self, initiator: bool, remote_hint: PeerMetadata) -> Result<()>;

    /// Enqueue a frame for delivery; does not wait for a response.
    async fn send(&self, payload: FramePayload) -> Result<()>;

    /// Send a frame and await its correlated response.
    async fn request(&self, payload: FramePayload, timeout: Duration) -> Result<Envelope>;

    /// Tear the connection down with the given reason.
    async fn close(&self, reason: DisconnectReason);

    /// Whether the connection is currently `Open`.
    async fn is_open(&self) -> bool;

    /// The peer's last-known metadata, as adopted from its handshake frame. `None` before
    /// the handshake completes.
    async fn metadata(&self) -> Option<PeerMetadata>;

    /// Send a keep-alive ping, applying the inactive-tab filter (§4.4).
    async fn ping(&self) -> PingOutcome;

    /// Take ownership of this manager's event receiver. Returns `None` if already taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Deliver a signaling frame relayed to this manager's peer by the owning Kademlia
    /// layer (§4.9's "forwarded verbatim to the target's `TransportManager`"). WebSocket
    /// managers never negotiate SDP and reject with [`DhtError::Protocol`]; WebRTC managers
    /// drive their `RTCPeerConnection` from it.
    async fn handle_signal(&self, payload: FramePayload) -> Result<()>;
}

/// Transport-agnostic state and logic shared by every concrete [`TransportManager`].
pub struct ManagerCore {
    local_id: NodeId,
    peer: NodeId,
    kind: TransportKind,
    config: TransportConfig,
    host: Arc<dyn HostEnvironment>,
    registry: ConnectionRegistry,
    pending: PendingRequests,
    metadata: RwLock<Option<PeerMetadata>>,
    local_metadata: RwLock<PeerMetadata>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    event_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    next_ping_id: AtomicI64,
}

impl ManagerCore {
    /// Construct a fresh core for a manager dedicated to `peer`, seeded with the local
    /// node's own metadata so the handshake payload is complete without a round-trip
    /// (§4.10).
    pub fn new(
        local_id: NodeId,
        peer: NodeId,
        kind: TransportKind,
        config: TransportConfig,
        host: Arc<dyn HostEnvironment>,
        local_metadata: PeerMetadata,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            local_id,
            peer,
            kind,
            config,
            host,
            registry: ConnectionRegistry::new(),
            pending: PendingRequests::new(),
            metadata: RwLock::new(None),
            local_metadata: RwLock::new(local_metadata),
            event_tx,
            event_rx: std::sync::Mutex::new(Some(event_rx)),
            next_ping_id: AtomicI64::new(0),
        }
    }

    /// The local node's own metadata, as advertised in the outbound handshake frame.
    pub async fn local_metadata(&self) -> PeerMetadata {
        self.local_metadata.read().await.clone()
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn peer(&self) -> NodeId {
        self.peer
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn HostEnvironment> {
        &self.host
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.event_rx.lock().expect("event_rx mutex poisoned").take()
    }

    pub fn emit(&self, event: TransportEvent) {
        // The receiving end (Kademlia layer) may have dropped its handle on shutdown; a
        // send failure here is not actionable.
        let _ = self.event_tx.send(event);
    }

    /// The peer's last-known metadata, as adopted from its handshake frame.
    pub async fn metadata(&self) -> Option<PeerMetadata> {
        self.metadata.read().await.clone()
    }

    /// Atomically adopt peer metadata, per §4.5's requirement that this happen before any
    /// DHT frame from the peer is processed.
    pub async fn adopt_metadata(&self, metadata: PeerMetadata) {
        *self.metadata.write().await = Some(metadata);
    }

    pub async fn is_open(&self) -> bool {
        self.registry.is_open().await
    }

    /// Resolve glare contention before a transport-specific dial begins.
    pub async fn resolve_glare(&self) -> NegotiationOutcome {
        resolve_glare(&self.registry, self.local_id, self.peer, self.config.glare_yield_pause).await
    }

    /// Install the connection handle produced by a successful transport-specific dial or
    /// accept, transition it to `Open`, and emit `peer-connected` (§4.5 step 3).
    pub async fn install_open(&self, handle: ConnectionHandle) {
        self.registry.install(handle).await;
        self.registry.set_state(ConnectionState::Open).await;
        self.emit(TransportEvent::PeerConnected { peer: self.peer });
    }

    /// Tear the connection down and emit `peer-disconnected`, draining any pending
    /// requests addressed to this peer (§5: no `PendingRequest` outlives a connection).
    pub async fn close(&self, reason: DisconnectReason) {
        self.registry.close().await;
        self.pending.fail_peer(self.peer).await;
        self.emit(TransportEvent::PeerDisconnected {
            peer: self.peer,
            reason,
        });
    }

    /// Enqueue a frame on the active connection's outbound queue.
    pub async fn send(&self, payload: FramePayload) -> Result<()> {
        if !self.is_open().await {
            return Err(DhtError::NotOpen);
        }
        let envelope = Envelope::new(self.local_id, payload);
        self.registry
            .send(envelope)
            .await
            .map_err(|_| DhtError::Closed("outbound queue closed".to_string()))
    }

    /// Send a frame carrying an explicit `requestId` and await its correlated response.
    pub async fn request(&self, payload: FramePayload, timeout: Duration) -> Result<Envelope> {
        if !self.is_open().await {
            return Err(DhtError::NotOpen);
        }
        let request_id = payload
            .request_id()
            .map(RequestId::from_wire)
            .ok_or_else(|| DhtError::Protocol("payload carries no requestId".to_string()))?;
        let envelope = Envelope::new(self.local_id, payload);
        let receiver = self.pending.register(request_id, self.peer, timeout).await;
        self.registry
            .send(envelope)
            .await
            .map_err(|_| DhtError::Closed("outbound queue closed".to_string()))?;
        await_response(receiver, timeout).await
    }

    /// Build this side's outbound handshake frame (§4.5).
    pub async fn hello_frame(&self) -> FramePayload {
        let local_metadata = self.local_metadata().await;
        FramePayload::DhtPeerHello {
            peer_id: self.local_id.to_hex(),
            metadata: (&local_metadata).into(),
        }
    }

    /// Build this side's handshake acknowledgement frame (§4.5).
    pub async fn ack_frame(&self) -> FramePayload {
        let local_metadata = self.local_metadata().await;
        FramePayload::DhtPeerConnected {
            bridge_node_id: self.local_id.to_hex(),
            success: true,
            metadata: (&local_metadata).into(),
        }
    }

    /// Synthesize the correlation id used to match a `pong`'s `originalTimestamp` back to
    /// the `ping` that solicited it — pings carry no `requestId` on the wire (§6).
    fn ping_correlation_id(timestamp: i64) -> RequestId {
        RequestId::from_wire(format!("ping:{timestamp}"))
    }

    /// Send a keep-alive ping, honoring the inactive-tab filter (§4.4): a browser peer
    /// whose tab is reported hidden is never pinged, so hidden-tab latency cannot poison
    /// aggregate health statistics.
    pub async fn ping(&self) -> PingOutcome {
        if let Some(metadata) = self.metadata().await {
            if metadata.is_inactive_browser_tab() {
                debug!(peer = %self.peer, "skipping ping: inactive browser tab");
                return PingOutcome::InactiveTab;
            }
        }
        if !self.is_open().await {
            return PingOutcome::Failed {
                reason: "not open".to_string(),
            };
        }

        let timestamp = now_unix_ms() + self.next_ping_id.fetch_add(1, Ordering::Relaxed);
        let request_id = Self::ping_correlation_id(timestamp);
        let receiver = self
            .pending
            .register(request_id, self.peer, self.config.ping_timeout)
            .await;

        let envelope = Envelope {
            from: self.local_id.to_hex(),
            timestamp,
            payload: FramePayload::Ping,
        };
        if self.registry.send(envelope).await.is_err() {
            return PingOutcome::Failed {
                reason: "not open".to_string(),
            };
        }

        match await_response(receiver, self.config.ping_timeout).await {
            Ok(_) => {
                let rtt_ms = (now_unix_ms() - timestamp).max(0) as u64;
                PingOutcome::Success { rtt_ms }
            }
            Err(err) => PingOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }

    /// Send a WebRTC application-layer `keep_alive_ping` (§4.7, §6), correlated by its own
    /// `pingId` rather than the generic `ping`'s timestamp, and awaited against
    /// `keepalive_timeout` (60 s) rather than `ping_timeout`'s 5 s — a browser peer that
    /// answers in, say, 30 s must not be counted as a miss.
    pub async fn keep_alive_ping(&self) -> PingOutcome {
        if let Some(metadata) = self.metadata().await {
            if metadata.is_inactive_browser_tab() {
                debug!(peer = %self.peer, "skipping keep-alive ping: inactive browser tab");
                return PingOutcome::InactiveTab;
            }
        }
        if !self.is_open().await {
            return PingOutcome::Failed {
                reason: "not open".to_string(),
            };
        }

        let ping_id = uuid::Uuid::new_v4().to_string();
        let request_id = RequestId::from_wire(ping_id.clone());
        let sent_at = now_unix_ms();
        let receiver = self
            .pending
            .register(request_id, self.peer, self.config.keepalive_timeout)
            .await;

        if self.send(FramePayload::KeepAlivePing { ping_id }).await.is_err() {
            return PingOutcome::Failed {
                reason: "not open".to_string(),
            };
        }

        match await_response(receiver, self.config.keepalive_timeout).await {
            Ok(_) => {
                let rtt_ms = (now_unix_ms() - sent_at).max(0) as u64;
                PingOutcome::Success { rtt_ms }
            }
            Err(err) => PingOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }

    /// Route an inbound envelope: first try to resolve it against a pending request
    /// (covers `pong`, `find_node_response`, `find_value_response`, `store_response`);
    /// otherwise classify and either auto-answer (`ping` -> `pong`) or hand it to the
    /// caller as a [`TransportEvent`] (§4.4).
    ///
    /// Callers MUST have already completed the handshake and called
    /// [`ManagerCore::adopt_metadata`] before invoking this for any given peer (§4.5).
    pub async fn dispatch_incoming(&self, envelope: Envelope) {
        self.registry.touch().await;

        if let FramePayload::Pong { original_timestamp } = &envelope.payload {
            let correlation_id = Self::ping_correlation_id(*original_timestamp);
            if self.pending.resolve(&correlation_id, self.peer, envelope.clone()).await {
                return;
            }
        } else if let FramePayload::KeepAlivePong { ping_id } = &envelope.payload {
            let correlation_id = RequestId::from_wire(ping_id.clone());
            if self.pending.resolve(&correlation_id, self.peer, envelope.clone()).await {
                return;
            }
        } else if let Some(request_id) = envelope.payload.request_id() {
            let request_id = RequestId::from_wire(request_id);
            if self.pending.resolve(&request_id, self.peer, envelope.clone()).await {
                return;
            }
        }

        match &envelope.payload {
            FramePayload::Ping => {
                let pong = FramePayload::Pong {
                    original_timestamp: envelope.timestamp,
                };
                if let Err(err) = self.send(pong).await {
                    warn!(peer = %self.peer, %err, "failed to answer ping with pong");
                }
            }
            FramePayload::Pong { .. } => {
                // Unmatched pong (e.g. arrived after our wait already timed out); not an
                // error, just nothing left to resolve.
            }
            FramePayload::KeepAlivePing { ping_id } => {
                let pong = FramePayload::KeepAlivePong {
                    ping_id: ping_id.clone(),
                };
                if let Err(err) = self.send(pong).await {
                    warn!(peer = %self.peer, %err, "failed to answer keep_alive_ping with keep_alive_pong");
                }
            }
            FramePayload::KeepAlivePong { .. } => {
                // Unmatched keep-alive pong; not an error, just nothing left to resolve.
            }
            FramePayload::ConnectionOffer { .. }
            | FramePayload::ConnectionAnswer { .. }
            | FramePayload::ConnectionCandidate { .. }
            | FramePayload::ConnectionRequest { .. } => {
                self.emit(TransportEvent::Signal {
                    peer: self.peer,
                    envelope,
                });
            }
            _ => {
                self.emit(TransportEvent::DhtMessage {
                    peer: self.peer,
                    envelope,
                });
            }
        }
    }
}

fn now_unix_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::AlwaysVisible;
    use dht_routing::NodeKind;
    use std::collections::HashSet;
    use tokio::sync::{mpsc as tmpsc, oneshot};

    fn peer_id(seed: &[u8]) -> NodeId {
        NodeId::from_public_key(seed)
    }

    fn local_metadata() -> PeerMetadata {
        PeerMetadata::new(
            NodeKind::Server,
            vec!["wss://local.example.invalid/".parse().unwrap()],
            None,
            HashSet::new(),
            None,
            "1",
            "build-1",
        )
        .unwrap()
    }

    fn core() -> ManagerCore {
        ManagerCore::new(
            peer_id(b"local"),
            peer_id(b"peer"),
            TransportKind::WebSocket,
            TransportConfig::default(),
            Arc::new(AlwaysVisible::default()),
            local_metadata(),
        )
    }

    fn webrtc_core_with_config(config: TransportConfig) -> ManagerCore {
        ManagerCore::new(
            peer_id(b"local"),
            peer_id(b"peer"),
            TransportKind::WebRtc,
            config,
            Arc::new(AlwaysVisible::default()),
            local_metadata(),
        )
    }

    async fn open_handle(core: &ManagerCore) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = tmpsc::unbounded_channel();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        let handle = ConnectionHandle::new(
            core.peer(),
            ConnectionDirection::Outbound,
            TransportKind::WebSocket,
            tx,
            shutdown_tx,
        );
        core.install_open(handle).await;
        rx
    }

    #[tokio::test]
    async fn send_fails_when_not_open() {
        let core = core();
        let err = core.send(FramePayload::Ping).await.unwrap_err();
        assert!(matches!(err, DhtError::NotOpen));
    }

    #[tokio::test]
    async fn ping_is_suppressed_for_inactive_browser_tab() {
        let core = core();
        let _outbound = open_handle(&core).await;
        let metadata = PeerMetadata::new(
            NodeKind::Browser,
            vec![],
            None,
            HashSet::new(),
            Some(false),
            "1",
            "build-1",
        )
        .unwrap();
        core.adopt_metadata(metadata).await;

        let outcome = core.ping().await;
        assert_eq!(outcome, PingOutcome::InactiveTab);
    }

    #[tokio::test]
    async fn ping_resolves_on_matching_pong() {
        let core = Arc::new(core());
        let mut outbound = open_handle(&core).await;

        let core_ping = core.clone();
        let ping_task = tokio::spawn(async move { core_ping.ping().await });

        let sent = outbound.recv().await.expect("ping envelope sent");
        assert!(matches!(sent.payload, FramePayload::Ping));

        let pong = Envelope {
            from: core.peer().to_hex(),
            timestamp: sent.timestamp + 5,
            payload: FramePayload::Pong {
                original_timestamp: sent.timestamp,
            },
        };
        core.dispatch_incoming(pong).await;

        let outcome = ping_task.await.unwrap();
        assert!(outcome.succeeded());
    }

    #[tokio::test]
    async fn keep_alive_ping_sends_application_layer_frame_and_resolves_on_matching_pong() {
        let core = Arc::new(core());
        let mut outbound = open_handle(&core).await;

        let core_ping = core.clone();
        let ping_task = tokio::spawn(async move { core_ping.keep_alive_ping().await });

        let sent = outbound.recv().await.expect("keep_alive_ping envelope sent");
        let ping_id = match sent.payload {
            FramePayload::KeepAlivePing { ping_id } => ping_id,
            other => panic!("expected KeepAlivePing, got {other:?}"),
        };

        let pong = Envelope {
            from: core.peer().to_hex(),
            timestamp: sent.timestamp + 5,
            payload: FramePayload::KeepAlivePong { ping_id },
        };
        core.dispatch_incoming(pong).await;

        let outcome = ping_task.await.unwrap();
        assert!(outcome.succeeded());
    }

    #[tokio::test]
    async fn keep_alive_ping_honors_the_keepalive_timeout_not_the_ping_timeout() {
        // A reply arriving after `ping_timeout` (5s in the default config) but within
        // `keepalive_timeout` must still count as a success (§4.7/§6): the two deadlines
        // are independent, and `keep_alive_ping` must wait out its own.
        let mut config = TransportConfig::default();
        config.ping_timeout = Duration::from_millis(10);
        config.keepalive_timeout = Duration::from_millis(200);
        let core = Arc::new(webrtc_core_with_config(config));
        let mut outbound = open_handle(&core).await;

        let core_ping = core.clone();
        let ping_task = tokio::spawn(async move { core_ping.keep_alive_ping().await });

        let sent = outbound.recv().await.expect("keep_alive_ping envelope sent");
        let ping_id = match sent.payload {
            FramePayload::KeepAlivePing { ping_id } => ping_id,
            other => panic!("expected KeepAlivePing, got {other:?}"),
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let pong = Envelope {
            from: core.peer().to_hex(),
            timestamp: sent.timestamp + 50,
            payload: FramePayload::KeepAlivePong { ping_id },
        };
        core.dispatch_incoming(pong).await;

        let outcome = ping_task.await.unwrap();
        assert!(outcome.succeeded(), "reply within keepalive_timeout must succeed even past ping_timeout");
    }

    #[tokio::test]
    async fn keep_alive_ping_times_out_after_keepalive_timeout_elapses() {
        let mut config = TransportConfig::default();
        config.keepalive_timeout = Duration::from_millis(20);
        let core = Arc::new(webrtc_core_with_config(config));
        let _outbound = open_handle(&core).await;

        let outcome = core.keep_alive_ping().await;
        assert!(matches!(outcome, PingOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn dispatch_incoming_auto_answers_keep_alive_ping_with_matching_ping_id() {
        let core = core();
        let mut outbound = open_handle(&core).await;

        core.dispatch_incoming(Envelope {
            from: core.peer().to_hex(),
            timestamp: 1,
            payload: FramePayload::KeepAlivePing {
                ping_id: "probe-1".to_string(),
            },
        })
        .await;

        let reply = outbound.recv().await.expect("keep_alive_pong sent");
        assert!(matches!(
            reply.payload,
            FramePayload::KeepAlivePong { ping_id } if ping_id == "probe-1"
        ));
    }

    #[tokio::test]
    async fn unrecognized_frame_is_forwarded_as_dht_message() {
        let core = core();
        let _outbound = open_handle(&core).await;
        let mut events = core.take_events().unwrap();

        core.dispatch_incoming(Envelope {
            from: core.peer().to_hex(),
            timestamp: 1,
            payload: FramePayload::Unknown,
        })
        .await;

        let event = events.recv().await.unwrap();
        assert!(matches!(event, TransportEvent::DhtMessage { .. }));
    }

    #[tokio::test]
    async fn signal_frames_are_emitted_as_signal_events() {
        let core = core();
        let _outbound = open_handle(&core).await;
        let mut events = core.take_events().unwrap();

        core.dispatch_incoming(Envelope {
            from: core.peer().to_hex(),
            timestamp: 1,
            payload: FramePayload::ConnectionRequest {
                listening_address: "wss://example.invalid/".to_string(),
                capabilities: vec![],
            },
        })
        .await;

        let event = events.recv().await.unwrap();
        assert!(matches!(event, TransportEvent::Signal { .. }));
    }
}
