// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! `BootstrapClient` (§4.8): a long-lived link to a bootstrap endpoint, independent of the
//! DHT peer set it helps populate.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use dht_id::NodeId;
use dht_identity::Identity;
use dht_routing::PeerMetadata;
use dht_transport::{DhtError, FramePayload, SignalRelay, WireMetadata};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::BackoffIter;
use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result};
use crate::wire::{BootstrapFrame, PeersOrGenesisData};

type LinkStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Current state of the link to a bootstrap endpoint, reported via [`BootstrapEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// The server rejected this client permanently (`version_mismatch`) or the reconnect
    /// budget was exhausted; the client will not try again without a process restart.
    Fatal(String),
}

/// Events pushed out of a [`BootstrapClient`] for the owning node to observe.
#[derive(Debug, Clone)]
pub enum BootstrapEvent {
    LinkStateChanged(LinkState),
    /// The server asked this node, on another peer's behalf, to open a listener and report
    /// back its address (§4.8 bullet 3).
    InvitationReceived { inviter: NodeId },
    /// A DHT signal frame relayed through the bootstrap link because the sender had no
    /// `TransportManager` open to `from` (§4.9's bootstrap fallback).
    SignalReceived { from: NodeId, payload: FramePayload },
}

/// The result of `get_peers_or_genesis` (§4.8 bullet 2).
#[derive(Debug, Clone)]
pub struct PeersOrGenesis {
    /// `true` when the requester is the first node in the network and should treat itself
    /// as the initial DHT of one.
    pub is_genesis: bool,
    pub peers: Vec<(NodeId, PeerMetadata)>,
}

type PeersWaiter = oneshot::Sender<Result<PeersOrGenesis>>;
type InvitationWaiter = oneshot::Sender<Result<Url>>;

struct Inner {
    local_id: NodeId,
    identity: Mutex<Identity>,
    config: BootstrapConfig,
    metadata_provider: Box<dyn Fn() -> PeerMetadata + Send + Sync>,
    outbound: RwLock<Option<mpsc::UnboundedSender<BootstrapFrame>>>,
    state: RwLock<LinkState>,
    event_tx: mpsc::UnboundedSender<BootstrapEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<BootstrapEvent>>>,
    peers_waiters: Mutex<VecDeque<PeersWaiter>>,
    invitation_waiters: Mutex<HashMap<NodeId, InvitationWaiter>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Inner {
    async fn set_state(&self, state: LinkState) {
        *self.state.write().await = state.clone();
        let _ = self.event_tx.send(BootstrapEvent::LinkStateChanged(state));
    }

    async fn send_frame(&self, frame: BootstrapFrame) -> Result<()> {
        let guard = self.outbound.read().await;
        let sender = guard.as_ref().ok_or(BootstrapError::NotConnected)?;
        sender.send(frame).map_err(|e| BootstrapError::Channel(e.to_string()))
    }
}

/// A long-lived, self-reconnecting link to a bootstrap endpoint.
///
/// Holds no DHT peer state itself: it authenticates, answers `get_peers_or_genesis`,
/// relays invitations and WebRTC signaling on behalf of the Kademlia layer, and
/// reconnects on its own schedule whenever the link drops (§4.8, §5 "shared resources").
pub struct BootstrapClient {
    inner: Arc<Inner>,
}

impl BootstrapClient {
    /// `metadata_provider` is polled fresh on every `register`, so that a changing
    /// listening address (e.g. the WebSocket listener binding after startup) is always
    /// reflected in admission without the caller having to restart the link.
    pub fn new(
        local_id: NodeId,
        identity: Identity,
        config: BootstrapConfig,
        metadata_provider: impl Fn() -> PeerMetadata + Send + Sync + 'static,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                local_id,
                identity: Mutex::new(identity),
                config,
                metadata_provider: Box::new(metadata_provider),
                outbound: RwLock::new(None),
                state: RwLock::new(LinkState::Disconnected),
                event_tx,
                event_rx: Mutex::new(Some(event_rx)),
                peers_waiters: Mutex::new(VecDeque::new()),
                invitation_waiters: Mutex::new(HashMap::new()),
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Start the background reconnect loop. Calling this more than once restarts it.
    pub async fn spawn(&self) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.inner.shutdown.lock().await = Some(shutdown_tx);
        tokio::spawn(run_reconnect_loop(self.inner.clone(), shutdown_rx));
    }

    /// Stop reconnecting and close the current link, if any.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.inner.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        *self.inner.outbound.write().await = None;
        self.inner.set_state(LinkState::Disconnected).await;
    }

    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<BootstrapEvent>> {
        self.inner.event_rx.blocking_lock().take()
    }

    pub async fn state(&self) -> LinkState {
        self.inner.state.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.inner.state.read().await, LinkState::Connected)
    }

    /// Ask the bootstrap endpoint for up to `max_peers` contacts, or to be told this node
    /// is the first in the network (§4.8 bullet 2).
    pub async fn get_peers_or_genesis(&self, max_peers: usize) -> Result<PeersOrGenesis> {
        let (tx, rx) = oneshot::channel();
        self.inner.peers_waiters.lock().await.push_back(tx);
        if let Err(err) = self
            .inner
            .send_frame(BootstrapFrame::GetPeersOrGenesis { max_peers })
            .await
        {
            self.inner.peers_waiters.lock().await.pop_back();
            return Err(err);
        }
        tokio::time::timeout(self.inner.config.request_timeout, rx)
            .await
            .map_err(|_| BootstrapError::Timeout("get_peers_or_genesis".to_string()))??
    }

    /// Ask the server to introduce this node to `target`, waiting for the target to start
    /// its listener and report back its address (§4.8 bullet 3).
    pub async fn create_invitation_for_peer(&self, target: NodeId) -> Result<Url> {
        let (tx, rx) = oneshot::channel();
        self.inner.invitation_waiters.lock().await.insert(target, tx);
        if let Err(err) = self
            .inner
            .send_frame(BootstrapFrame::CreateInvitationForPeer {
                target_node_id: target.to_hex(),
            })
            .await
        {
            self.inner.invitation_waiters.lock().await.remove(&target);
            return Err(err);
        }
        tokio::time::timeout(self.inner.config.request_timeout, rx)
            .await
            .map_err(|_| BootstrapError::Timeout("create_invitation_for_peer".to_string()))??
    }

    /// Called once this node has started its listener in response to an
    /// [`BootstrapEvent::InvitationReceived`], reporting the address the inviter should
    /// dial.
    pub async fn respond_to_invitation(&self, listening_address: Url) -> Result<()> {
        self.inner
            .send_frame(BootstrapFrame::ListeningAddress {
                target_node_id: self.inner.local_id.to_hex(),
                listening_address: listening_address.to_string(),
            })
            .await
    }

    /// Forward a DHT signal frame through the bootstrap link on `peer`'s behalf, the
    /// last-resort path when no `TransportManager` is open to them (§4.9).
    pub async fn relay_signal(&self, peer: NodeId, payload: FramePayload) -> Result<()> {
        self.inner
            .send_frame(BootstrapFrame::RelaySignal {
                to_peer_id: Some(peer.to_hex()),
                from_peer_id: None,
                payload,
            })
            .await
    }
}

#[async_trait]
impl SignalRelay for BootstrapClient {
    async fn relay(&self, peer: NodeId, payload: FramePayload) -> dht_transport::Result<()> {
        self.relay_signal(peer, payload).await.map_err(|err| match err {
            BootstrapError::NotConnected => DhtError::NoReachableAddress,
            BootstrapError::Timeout(msg) => DhtError::Timeout(msg),
            BootstrapError::Closed(msg) => DhtError::Closed(msg),
            other => DhtError::Transport(other.to_string()),
        })
    }
}

async fn run_reconnect_loop(inner: Arc<Inner>, mut shutdown_rx: oneshot::Receiver<()>) {
    let mut backoff = BackoffIter::new(inner.config.backoff);
    let mut attempts: u32 = 0;

    'reconnect: loop {
        if inner.config.endpoints.is_empty() {
            warn!("no bootstrap endpoints configured; giving up");
            inner
                .set_state(LinkState::Fatal("no bootstrap endpoints configured".to_string()))
                .await;
            return;
        }

        for endpoint in inner.config.endpoints.clone() {
            tokio::select! {
                _ = &mut shutdown_rx => return,
                result = connect_and_serve(&inner, &endpoint) => {
                    match result {
                        Ok(()) => {
                            attempts = 0;
                            backoff = BackoffIter::new(inner.config.backoff);
                            continue 'reconnect;
                        }
                        Err(BootstrapError::VersionMismatch {
                            client_version,
                            server_version,
                            client_build_id,
                            server_build_id,
                        }) => {
                            let message = format!(
                                "version mismatch: client {client_version}/{client_build_id}, \
                                 server {server_version}/{server_build_id}"
                            );
                            warn!(%message, "bootstrap admission rejected permanently");
                            inner.set_state(LinkState::Fatal(message)).await;
                            return;
                        }
                        Err(err) => {
                            warn!(%err, %endpoint, "bootstrap connection attempt failed");
                        }
                    }
                }
            }
        }

        attempts += 1;
        if inner.config.max_reconnect_attempts != 0 && attempts >= inner.config.max_reconnect_attempts {
            let message = format!("exceeded {attempts} reconnect attempts");
            warn!(%message, "giving up on bootstrap link");
            inner.set_state(LinkState::Fatal(message)).await;
            return;
        }

        inner.set_state(LinkState::Disconnected).await;
        let delay = backoff.next().unwrap_or(std::time::Duration::from_secs(60));
        tokio::select! {
            _ = &mut shutdown_rx => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn connect_and_serve(inner: &Arc<Inner>, endpoint: &Url) -> Result<()> {
    inner.set_state(LinkState::Connecting).await;

    let (stream, _response) = tokio::time::timeout(
        inner.config.request_timeout,
        tokio_tungstenite::connect_async(endpoint.as_str()),
    )
    .await
    .map_err(|_| BootstrapError::Timeout("connect".to_string()))??;

    let mut stream = stream;
    admit(inner, &mut stream).await?;

    info!(%endpoint, "bootstrap link admitted");
    inner.set_state(LinkState::Connected).await;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    *inner.outbound.write().await = Some(outbound_tx);

    let result = loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if let Err(err) = send_frame(&mut stream, &frame).await {
                            break Err(err);
                        }
                    }
                    None => break Ok(()),
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<BootstrapFrame>(&text) {
                            Ok(frame) => {
                                if let Err(err) = dispatch_inbound(inner, frame).await {
                                    break Err(err);
                                }
                            }
                            Err(err) => warn!(%err, "dropped malformed bootstrap frame"),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        debug!(?code, "bootstrap link closed by server");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Err(BootstrapError::WebSocket(err)),
                    None => break Ok(()),
                }
            }
        }
    };

    *inner.outbound.write().await = None;
    fail_all_waiters(inner, "bootstrap link closed").await;
    let _ = stream.close(None).await;
    result
}

async fn admit(inner: &Arc<Inner>, stream: &mut LinkStream) -> Result<()> {
    let metadata = (inner.metadata_provider)();
    let register = BootstrapFrame::Register {
        node_id: inner.local_id.to_hex(),
        protocol_version: inner.config.protocol_version.clone(),
        build_id: inner.config.build_id.clone(),
        metadata: WireMetadata::from(&metadata),
    };
    send_frame(stream, &register).await?;

    loop {
        let frame = tokio::time::timeout(inner.config.request_timeout, recv_frame(stream))
            .await
            .map_err(|_| BootstrapError::Timeout("admission".to_string()))??;

        match frame {
            BootstrapFrame::AuthChallenge { nonce, timestamp } => {
                let challenge = format!("{nonce}:{timestamp}");
                let signature = {
                    let mut identity = inner.identity.lock().await;
                    identity.sign(challenge.as_bytes())
                };
                let response = BootstrapFrame::AuthResponse {
                    signature_hex: hex::encode(signature.to_bytes()),
                };
                send_frame(stream, &response).await?;
            }
            BootstrapFrame::Registered => return Ok(()),
            BootstrapFrame::VersionMismatch {
                client_version,
                server_version,
                client_build_id,
                server_build_id,
            } => {
                return Err(BootstrapError::VersionMismatch {
                    client_version,
                    server_version,
                    client_build_id,
                    server_build_id,
                })
            }
            other => {
                return Err(BootstrapError::Protocol(format!(
                    "unexpected frame during admission: {other:?}"
                )))
            }
        }
    }
}

async fn send_frame(stream: &mut LinkStream, frame: &BootstrapFrame) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    stream.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn recv_frame(stream: &mut LinkStream) -> Result<BootstrapFrame> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(Message::Close(_))) | None => {
                return Err(BootstrapError::Closed("connection closed".to_string()))
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(BootstrapError::WebSocket(err)),
        }
    }
}

async fn dispatch_inbound(inner: &Arc<Inner>, frame: BootstrapFrame) -> Result<()> {
    match frame {
        BootstrapFrame::Response { success, data } => {
            let result = match (success, data) {
                (true, Some(PeersOrGenesisData { is_genesis, peers })) => {
                    let mut converted = Vec::with_capacity(peers.len());
                    for node in peers {
                        let Ok(node_id) = NodeId::from_hex(&node.node_id) else {
                            warn!(node_id = %node.node_id, "bootstrap returned an unparsable node id");
                            continue;
                        };
                        match PeerMetadata::try_from(node.metadata) {
                            Ok(metadata) => converted.push((node_id, metadata)),
                            Err(err) => warn!(%err, %node_id, "bootstrap returned unusable peer metadata"),
                        }
                    }
                    Ok(PeersOrGenesis { is_genesis, peers: converted })
                }
                (true, None) => Err(BootstrapError::Protocol("response missing data".to_string())),
                (false, _) => Err(BootstrapError::Protocol("bootstrap request failed".to_string())),
            };
            if let Some(waiter) = inner.peers_waiters.lock().await.pop_front() {
                let _ = waiter.send(result);
            }
        }
        BootstrapFrame::InvitationForBridge { inviter_node_id } => match NodeId::from_hex(&inviter_node_id) {
            Ok(inviter) => {
                let _ = inner.event_tx.send(BootstrapEvent::InvitationReceived { inviter });
            }
            Err(err) => warn!(%err, "invitation_for_bridge carried an unparsable inviter id"),
        },
        BootstrapFrame::ListeningAddress {
            target_node_id,
            listening_address,
        } => match NodeId::from_hex(&target_node_id) {
            Ok(target) => {
                if let Some(waiter) = inner.invitation_waiters.lock().await.remove(&target) {
                    let result = Url::parse(&listening_address)
                        .map_err(|err| BootstrapError::Protocol(format!("invalid listening address: {err}")));
                    let _ = waiter.send(result);
                }
            }
            Err(err) => warn!(%err, "listening_address carried an unparsable target id"),
        },
        BootstrapFrame::RelaySignal {
            from_peer_id: Some(from_peer_id),
            payload,
            ..
        } => match NodeId::from_hex(&from_peer_id) {
            Ok(from) => {
                let _ = inner.event_tx.send(BootstrapEvent::SignalReceived { from, payload });
            }
            Err(err) => warn!(%err, "relay_signal carried an unparsable sender id"),
        },
        BootstrapFrame::VersionMismatch {
            client_version,
            server_version,
            client_build_id,
            server_build_id,
        } => {
            return Err(BootstrapError::VersionMismatch {
                client_version,
                server_version,
                client_build_id,
                server_build_id,
            })
        }
        other => debug!(?other, "ignoring unexpected bootstrap frame outside admission"),
    }
    Ok(())
}

async fn fail_all_waiters(inner: &Arc<Inner>, reason: &str) {
    let mut peers_waiters = inner.peers_waiters.lock().await;
    while let Some(waiter) = peers_waiters.pop_front() {
        let _ = waiter.send(Err(BootstrapError::Closed(reason.to_string())));
    }
    let mut invitation_waiters = inner.invitation_waiters.lock().await;
    for (_, waiter) in invitation_waiters.drain() {
        let _ = waiter.send(Err(BootstrapError::Closed(reason.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use dht_routing::NodeKind;

    fn metadata() -> PeerMetadata {
        PeerMetadata::new(
            NodeKind::Server,
            vec!["wss://node.example.invalid/".parse().unwrap()],
            None,
            HashSet::new(),
            None,
            "1",
            "build-1",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn new_client_starts_disconnected() {
        let client = BootstrapClient::new(
            NodeId::from_public_key(b"bootstrap-client-test"),
            Identity::generate(),
            BootstrapConfig::default(),
            metadata,
        );
        assert_eq!(client.state().await, LinkState::Disconnected);
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn get_peers_without_a_link_fails_fast() {
        let client = BootstrapClient::new(
            NodeId::from_public_key(b"bootstrap-client-test-2"),
            Identity::generate(),
            BootstrapConfig::default(),
            metadata,
        );
        let result = client.get_peers_or_genesis(20).await;
        assert!(matches!(result, Err(BootstrapError::NotConnected)));
    }
}
