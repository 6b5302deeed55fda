// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! `WebRTCTransport` (§4.7): the transport used for browser-to-browser edges.
//!
//! One ordered, reliable `dht-data` data channel carries every DHT frame once the peer
//! connection reaches `connected`. Signaling (offer/answer/candidate) never touches this
//! module directly: it arrives and leaves as [`FramePayload`] values relayed through
//! [`SignalRelay`] and [`crate::event::TransportEvent::Signal`], so the data-channel layer
//! stays oblivious to how its signaling got there (direct connection vs. bootstrap relay).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dht_id::NodeId;
use dht_routing::PeerMetadata;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::IceServer;
use crate::connection::ConnectionHandle;
use crate::envelope::{Envelope, FramePayload};
use crate::error::{DhtError, Result};
use crate::event::DisconnectReason;
use crate::host::HostEnvironment;
use crate::manager::{ManagerCore, PingOutcome, TransportManager};
use crate::negotiation::{politeness, Politeness};
use crate::signal::SignalRelay;
use crate::types::{ConnectionDirection, ConnectionState, TransportKind};

const DATA_CHANNEL_LABEL: &str = "dht-data";

/// The per-peer `TransportManager` implementation for WebRTC edges.
pub struct WebRtcManager {
    core: Arc<ManagerCore>,
    signal_relay: Arc<dyn SignalRelay>,
    peer_connection: Mutex<Option<Arc<RTCPeerConnection>>>,
    /// Buffers remote ICE candidates that arrive before the remote description is set
    /// (§4.7: candidates must not be discarded while the answer/offer is still pending).
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    making_offer: RwLock<bool>,
    ignore_offer: RwLock<bool>,
    /// Notified the first time this peer connection's ICE gathering state leaves `New`.
    /// `handle_offer` waits on this (bounded) before relaying its answer, so the answer
    /// doesn't race ahead of every local candidate (§4.7).
    gathering_started: Arc<Notify>,
}

impl WebRtcManager {
    pub fn new(core: Arc<ManagerCore>, signal_relay: Arc<dyn SignalRelay>) -> Self {
        Self {
            core,
            signal_relay,
            peer_connection: Mutex::new(None),
            pending_candidates: Mutex::new(Vec::new()),
            making_offer: RwLock::new(false),
            ignore_offer: RwLock::new(false),
            gathering_started: Arc::new(Notify::new()),
        }
    }

    fn ice_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.core.config().ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        }
    }

    async fn build_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| DhtError::Transport(e.to_string()))?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| DhtError::Transport(e.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(self.ice_config())
                .await
                .map_err(|e| DhtError::Transport(e.to_string()))?,
        );

        let core = self.core.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let core = core.clone();
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                        core.close(DisconnectReason::Lost).await;
                    }
                    RTCPeerConnectionState::Disconnected => {
                        debug!(peer = %core.peer(), "webrtc peer connection disconnected, awaiting ICE recovery");
                    }
                    _ => {}
                }
            })
        }));

        let core_ice = self.core.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let core = core_ice.clone();
            Box::pin(async move {
                debug!(peer = %core.peer(), ?state, "ice connection state changed");
            })
        }));

        let peer = self.core.peer();
        let relay = self.signal_relay.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let relay = relay.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let Ok(init) = candidate.to_json() else { return };
                let Ok(signal) = serde_json::to_value(&init) else { return };
                let _ = relay
                    .relay(
                        peer,
                        FramePayload::ConnectionCandidate {
                            signal,
                            to_peer_id: peer.to_hex(),
                        },
                    )
                    .await;
            })
        }));

        let gathering_started = self.gathering_started.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGatheringState| {
            let gathering_started = gathering_started.clone();
            Box::pin(async move {
                if state != RTCIceGatheringState::New {
                    gathering_started.notify_one();
                }
            })
        }));

        let core_incoming = self.core.clone();
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let core = core_incoming.clone();
            Box::pin(async move {
                if channel.label() == DATA_CHANNEL_LABEL {
                    wire_data_channel(core, channel, ConnectionDirection::Inbound).await;
                }
            })
        }));

        Ok(pc)
    }
}

/// Wire up the generic event handlers (`on_open`/`on_message`/`on_close`) that turn a raw
/// `RTCDataChannel` into the read/write pump a [`ManagerCore`] expects, regardless of
/// whether this side created the channel (outbound) or received it (inbound).
async fn wire_data_channel(core: Arc<ManagerCore>, channel: Arc<RTCDataChannel>, direction: ConnectionDirection) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let channel_for_send = channel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    let _ = channel_for_send.close().await;
                    return;
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(envelope) => {
                            if let Ok(json) = serde_json::to_string(&envelope) {
                                if channel_for_send.send_text(json).await.is_err() {
                                    return;
                                }
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    });

    let handle = ConnectionHandle::new(core.peer(), direction, TransportKind::WebRtc, outbound_tx, shutdown_tx);

    let core_open = core.clone();
    // `on_open` fires at most once per data channel, so moving the handle into this
    // `FnOnce` closure is sound even though `ConnectionHandle` itself isn't `Clone`.
    channel.on_open(Box::new(move || {
        let core = core_open.clone();
        Box::pin(async move {
            core.install_open(handle).await;
        })
    }));

    let core_message = core.clone();
    channel.on_message(Box::new(move |msg: webrtc::data_channel::data_channel_message::DataChannelMessage| {
        let core = core_message.clone();
        Box::pin(async move {
            match std::str::from_utf8(&msg.data) {
                Ok(text) => match serde_json::from_str::<Envelope>(text) {
                    Ok(envelope) => core.dispatch_incoming(envelope).await,
                    Err(err) => warn!(peer = %core.peer(), %err, "dropped malformed data-channel frame"),
                },
                Err(err) => warn!(peer = %core.peer(), %err, "dropped non-utf8 data-channel frame"),
            }
        })
    }));

    let core_close = core.clone();
    channel.on_close(Box::new(move || {
        let core = core_close.clone();
        Box::pin(async move {
            core.close(DisconnectReason::Lost).await;
        })
    }));
}

impl WebRtcManager {
    /// Background keep-alive task (§4.7): ping cadence follows tab visibility, and two
    /// consecutive missed responses fail the connection. [`crate::factory::TransportFactory`]
    /// spawns this once it has the constructed `Arc<WebRtcManager>`.
    pub(crate) async fn keepalive_loop(self: Arc<Self>, host: Arc<dyn HostEnvironment>) {
        let mut visibility = host.watch_visibility();
        let mut consecutive_misses = 0u32;
        loop {
            let interval = if *visibility.borrow() {
                self.core.config().keepalive_visible_interval
            } else {
                self.core.config().keepalive_hidden_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = visibility.changed() => continue,
            }

            if !self.core.is_open().await {
                return;
            }
            match self.core.keep_alive_ping().await {
                PingOutcome::Success { .. } => consecutive_misses = 0,
                PingOutcome::InactiveTab => {}
                PingOutcome::Failed { .. } => {
                    consecutive_misses += 1;
                    if consecutive_misses >= self.core.config().max_missed_keepalives {
                        warn!(peer = %self.core.peer(), "webrtc connection failed keep-alive");
                        self.core.close(DisconnectReason::KeepAliveTimeout).await;
                        return;
                    }
                }
            }
        }
    }

    /// Handle an inbound offer/answer/candidate arriving via [`crate::event::TransportEvent::Signal`]
    /// (relayed in by the Kademlia layer, §4.9).
    pub async fn handle_signal(&self, payload: FramePayload) -> Result<()> {
        match payload {
            FramePayload::ConnectionOffer { signal, .. } => self.handle_offer(signal).await,
            FramePayload::ConnectionAnswer { signal, .. } => self.handle_answer(signal).await,
            FramePayload::ConnectionCandidate { signal, .. } => self.handle_candidate(signal).await,
            _ => Ok(()),
        }
    }

    async fn handle_offer(&self, signal: serde_json::Value) -> Result<()> {
        let offer: RTCSessionDescription =
            serde_json::from_value(signal).map_err(|e| DhtError::Protocol(format!("invalid offer: {e}")))?;

        let politeness = politeness(self.core.local_id(), self.core.peer());
        let making_offer = *self.making_offer.read().await;
        let collision = making_offer;
        *self.ignore_offer.write().await = politeness == Politeness::Impolite && collision;
        if *self.ignore_offer.read().await {
            debug!(peer = %self.core.peer(), "ignoring colliding offer as the impolite side");
            return Ok(());
        }

        let pc = self.peer_connection_or_init().await?;
        pc.set_remote_description(offer).await.map_err(|e| DhtError::Transport(e.to_string()))?;
        self.drain_pending_candidates(&pc).await?;

        let answer = pc.create_answer(None).await.map_err(|e| DhtError::Transport(e.to_string()))?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(|e| DhtError::Transport(e.to_string()))?;

        // Give ICE gathering a bounded head start so the answer doesn't relay ahead of
        // every local candidate (§4.7). A peer that never starts gathering (no usable ICE
        // servers reachable) still gets its answer once the grace period elapses.
        let _ = tokio::time::timeout(self.core.config().ice_gathering_grace, self.gathering_started.notified()).await;

        let signal = serde_json::to_value(&answer)?;
        self.signal_relay
            .relay(
                self.core.peer(),
                FramePayload::ConnectionAnswer {
                    signal,
                    to_peer_id: self.core.peer().to_hex(),
                },
            )
            .await
    }

    async fn handle_answer(&self, signal: serde_json::Value) -> Result<()> {
        let answer: RTCSessionDescription =
            serde_json::from_value(signal).map_err(|e| DhtError::Protocol(format!("invalid answer: {e}")))?;
        let guard = self.peer_connection.lock().await;
        let pc = guard.as_ref().ok_or_else(|| DhtError::Protocol("no peer connection for answer".to_string()))?;
        pc.set_remote_description(answer).await.map_err(|e| DhtError::Transport(e.to_string()))?;
        self.drain_pending_candidates(pc).await?;
        *self.making_offer.write().await = false;
        Ok(())
    }

    async fn handle_candidate(&self, signal: serde_json::Value) -> Result<()> {
        if *self.ignore_offer.read().await {
            return Ok(());
        }
        let init: RTCIceCandidateInit =
            serde_json::from_value(signal).map_err(|e| DhtError::Protocol(format!("invalid ice candidate: {e}")))?;

        let guard = self.peer_connection.lock().await;
        match guard.as_ref() {
            Some(pc) if pc.remote_description().await.is_some() => {
                pc.add_ice_candidate(init).await.map_err(|e| DhtError::Transport(e.to_string()))?;
            }
            _ => {
                drop(guard);
                self.pending_candidates.lock().await.push(init);
            }
        }
        Ok(())
    }

    async fn drain_pending_candidates(&self, pc: &Arc<RTCPeerConnection>) -> Result<()> {
        let mut pending = self.pending_candidates.lock().await;
        for candidate in pending.drain(..) {
            pc.add_ice_candidate(candidate).await.map_err(|e| DhtError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    async fn peer_connection_or_init(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut guard = self.peer_connection.lock().await;
        if let Some(pc) = guard.as_ref() {
            return Ok(pc.clone());
        }
        let pc = self.build_peer_connection().await?;
        *guard = Some(pc.clone());
        Ok(pc)
    }
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

#[async_trait]
impl TransportManager for WebRtcManager {
    fn peer(&self) -> NodeId {
        self.core.peer()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebRtc
    }

    async fn open(&self, initiator: bool, _remote_hint: PeerMetadata) -> Result<()> {
        let outcome = self.core.resolve_glare().await;
        use crate::negotiation::NegotiationOutcome::*;
        match outcome {
            AlreadyOpen => return Err(DhtError::Duplicate("already open".to_string())),
            KeepAttempt => return Ok(()),
            PoliteYielded => return Ok(()),
            Proceed => {}
        }

        self.core.registry().set_state(ConnectionState::Connecting).await;
        let pc = self.peer_connection_or_init().await?;

        if !initiator {
            // The offer itself arrives later through `handle_signal`; nothing to dial here.
            return Ok(());
        }

        *self.making_offer.write().await = true;
        let data_channel_init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let channel = pc
            .create_data_channel(DATA_CHANNEL_LABEL, Some(data_channel_init))
            .await
            .map_err(|e| DhtError::Transport(e.to_string()))?;
        wire_data_channel(self.core.clone(), channel, ConnectionDirection::Outbound).await;

        let offer = pc.create_offer(None).await.map_err(|e| DhtError::Transport(e.to_string()))?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(|e| DhtError::Transport(e.to_string()))?;
        *self.making_offer.write().await = false;

        let signal = serde_json::to_value(&offer)?;
        self.signal_relay
            .relay(
                self.core.peer(),
                FramePayload::ConnectionOffer {
                    signal,
                    to_peer_id: self.core.peer().to_hex(),
                },
            )
            .await
    }

    async fn send(&self, payload: FramePayload) -> Result<()> {
        self.core.send(payload).await
    }

    async fn request(&self, payload: FramePayload, timeout: Duration) -> Result<Envelope> {
        self.core.request(payload, timeout).await
    }

    async fn close(&self, reason: DisconnectReason) {
        if let Some(pc) = self.peer_connection.lock().await.take() {
            let _ = pc.close().await;
        }
        self.core.close(reason).await
    }

    async fn is_open(&self) -> bool {
        self.core.is_open().await
    }

    async fn metadata(&self) -> Option<PeerMetadata> {
        self.core.metadata().await
    }

    async fn ping(&self) -> PingOutcome {
        self.core.ping().await
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<crate::event::TransportEvent>> {
        self.core.take_events()
    }

    async fn handle_signal(&self, payload: FramePayload) -> Result<()> {
        WebRtcManager::handle_signal(self, payload).await
    }
}

