// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! `WebSocketTransport` (§4.6): the transport used for any edge involving a server.
//!
//! A server-capable node owns one [`WebSocketListener`]; browser nodes are clients only.
//! [`WebSocketManager`] is the per-peer [`crate::manager::TransportManager`] implementation
//! backed by a `tokio-tungstenite` connection, dialed either directly (server↔server,
//! browser→server) or completed via a reverse dial the listener hands off (server→browser,
//! §4.6).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dht_id::NodeId;
use dht_routing::{NodeKind, PeerMetadata};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::envelope::{Envelope, FramePayload};
use crate::error::{DhtError, Result};
use crate::event::DisconnectReason;
use crate::manager::{ManagerCore, PingOutcome, TransportManager};
use crate::signal::SignalRelay;
use crate::types::{ConnectionDirection, ConnectionState, TransportKind};

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ServerStream = WebSocketStream<TcpStream>;

/// One WebSocket connection, dialed out or accepted.
enum WsSocket {
    Client(ClientStream),
    Server(ServerStream),
}

impl WsSocket {
    async fn send_text(&mut self, text: String) -> std::result::Result<(), tokio_tungstenite::tungstenite::Error> {
        match self {
            WsSocket::Client(s) => s.send(Message::Text(text.into())).await,
            WsSocket::Server(s) => s.send(Message::Text(text.into())).await,
        }
    }

    async fn next_message(&mut self) -> Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> {
        match self {
            WsSocket::Client(s) => s.next().await,
            WsSocket::Server(s) => s.next().await,
        }
    }

    async fn close(&mut self) {
        let _ = match self {
            WsSocket::Client(s) => s.close(None).await,
            WsSocket::Server(s) => s.close(None).await,
        };
    }
}

/// The per-peer `TransportManager` implementation for WebSocket edges.
pub struct WebSocketManager {
    core: Arc<ManagerCore>,
    signal_relay: Arc<dyn SignalRelay>,
    /// Present only on server-capable nodes, which may need to ask a browser peer to dial
    /// back (§4.6).
    listener: Option<Arc<WebSocketListener>>,
}

impl WebSocketManager {
    /// Construct a manager dedicated to the peer identified by `core`, optionally with a
    /// handle to the local node's own listener (needed only when this node is itself
    /// server-capable and may have to wait on a reverse dial).
    pub fn new(core: Arc<ManagerCore>, signal_relay: Arc<dyn SignalRelay>, listener: Option<Arc<WebSocketListener>>) -> Self {
        Self {
            core,
            signal_relay,
            listener,
        }
    }

    fn dial_url(&self, remote_hint: &PeerMetadata) -> Result<url::Url> {
        if let Some(public) = &remote_hint.public_address {
            return Ok(public.clone());
        }
        if let Some(first) = remote_hint.listening_addresses.first() {
            return Ok(first.clone());
        }
        Err(DhtError::NoReachableAddress)
    }

    async fn do_outbound_dial(&self, remote_hint: PeerMetadata) -> Result<()> {
        let url = self.dial_url(&remote_hint)?;
        self.core.registry().set_state(ConnectionState::Connecting).await;

        let connect = tokio_tungstenite::connect_async(url.as_str());
        let (stream, _response) = tokio::time::timeout(self.core.config().connection_timeout, connect)
            .await
            .map_err(|_| DhtError::Timeout("connection attempt".to_string()))??;

        self.complete_handshake(WsSocket::Client(stream), ConnectionDirection::Outbound)
            .await
    }

    async fn request_reverse_dial(&self, remote_hint: &PeerMetadata) -> Result<()> {
        let _ = remote_hint;
        let local_metadata = self.core.local_metadata().await;
        let listening_address = local_metadata
            .public_address
            .as_ref()
            .or_else(|| local_metadata.listening_addresses.first())
            .ok_or(DhtError::NoReachableAddress)?
            .to_string();

        let listener = self.listener.as_ref().ok_or(DhtError::NoReachableAddress)?;
        let waiter = listener.register_pending_reverse_dial(self.core.peer()).await;

        self.signal_relay
            .relay(
                self.core.peer(),
                FramePayload::ConnectionRequest {
                    listening_address,
                    capabilities: local_metadata.capabilities.iter().cloned().collect(),
                },
            )
            .await?;

        let (socket, remote_metadata) = tokio::time::timeout(self.core.config().reverse_dial_timeout, waiter)
            .await
            .map_err(|_| DhtError::NoReverseDial)?
            .map_err(|_| DhtError::NoReverseDial)?;

        // The listener already consumed the browser's `dht_peer_hello` as the socket's
        // first frame while matching it to this pending reverse dial, so this side
        // replies exactly as `accept_handoff` does for a normal inbound connection
        // instead of sending a second hello and waiting on a frame the browser has no
        // reason to send (§4.6).
        self.accept_handoff(socket, remote_metadata).await
    }

    /// Complete the single-frame-each-way handshake (§4.5) over a freshly dialed socket,
    /// then hand the socket off to the background read/write pump.
    async fn complete_handshake(&self, mut socket: WsSocket, direction: ConnectionDirection) -> Result<()> {
        self.core.registry().set_state(ConnectionState::Handshaking).await;

        let hello = self.core.hello_frame().await;
        let envelope = Envelope::new(self.core.local_id(), hello);
        socket.send_text(serde_json::to_string(&envelope)?).await?;

        let deadline = self.core.config().connection_timeout;
        let remote_metadata = tokio::time::timeout(deadline, await_handshake_reply(&mut socket))
            .await
            .map_err(|_| DhtError::HandshakeFailed("no reply before deadline".to_string()))??;

        if direction == ConnectionDirection::Inbound {
            // We accepted the socket; the peer's `hello` is what `remote_metadata` above
            // just parsed, so our half of the exchange is the acknowledgement.
            let ack = self.core.ack_frame().await;
            let ack_envelope = Envelope::new(self.core.local_id(), ack);
            socket.send_text(serde_json::to_string(&ack_envelope)?).await?;
        }

        self.spawn_open_connection(socket, direction, remote_metadata).await;
        Ok(())
    }

    /// Finish a handshake for a connection the [`WebSocketListener`] accepted and is
    /// handing off to this already-constructed manager (new inbound peer path, §4.6).
    async fn accept_handoff(&self, mut socket: WsSocket, remote_metadata: PeerMetadata) -> Result<()> {
        self.core.registry().set_state(ConnectionState::Handshaking).await;

        let ack = self.core.ack_frame().await;
        let envelope = Envelope::new(self.core.local_id(), ack);
        socket.send_text(serde_json::to_string(&envelope)?).await?;

        self.spawn_open_connection(socket, ConnectionDirection::Inbound, remote_metadata)
            .await;
        Ok(())
    }

    async fn spawn_open_connection(&self, socket: WsSocket, direction: ConnectionDirection, remote_metadata: PeerMetadata) {
        self.core.adopt_metadata(remote_metadata).await;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = ConnectionHandle::new(self.core.peer(), direction, TransportKind::WebSocket, outbound_tx, shutdown_tx);
        self.core.install_open(handle).await;

        let pump_core = self.core.clone();
        tokio::spawn(run_connection(pump_core, socket, outbound_rx, shutdown_rx));

        let keepalive_core = self.core.clone();
        let ping_interval = self.core.config().ws_ping_interval;
        let max_missed = self.core.config().ws_max_missed_pings;
        tokio::spawn(async move {
            keepalive_loop(keepalive_core, ping_interval, max_missed).await;
        });
    }
}

async fn await_handshake_reply(socket: &mut WsSocket) -> Result<PeerMetadata> {
    loop {
        match socket.next_message().await {
            Some(Ok(Message::Text(text))) => {
                let envelope: Envelope = serde_json::from_str(&text)?;
                match envelope.payload {
                    FramePayload::DhtPeerConnected { metadata, .. } | FramePayload::DhtPeerHello { metadata, .. } => {
                        return PeerMetadata::try_from(metadata).map_err(|e| DhtError::HandshakeFailed(e.to_string()));
                    }
                    _ => continue,
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(DhtError::HandshakeFailed("connection closed during handshake".to_string()))
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(DhtError::Transport(err.to_string())),
        }
    }
}

async fn run_connection(
    core: Arc<ManagerCore>,
    mut socket: WsSocket,
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                socket.close().await;
                return;
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(envelope) => {
                        let json = match serde_json::to_string(&envelope) {
                            Ok(j) => j,
                            Err(err) => {
                                warn!(%err, "failed to serialize outbound envelope");
                                continue;
                            }
                        };
                        if let Err(err) = socket.send_text(json).await {
                            warn!(%err, peer = %core.peer(), "websocket send failed");
                            core.close(DisconnectReason::Lost).await;
                            return;
                        }
                    }
                    None => {
                        core.close(DisconnectReason::LocalClose).await;
                        return;
                    }
                }
            }
            incoming = socket.next_message() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => core.dispatch_incoming(envelope).await,
                            Err(err) => warn!(%err, peer = %core.peer(), "dropped malformed frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        core.close(DisconnectReason::RemoteClose).await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(%err, peer = %core.peer(), "websocket closed abnormally");
                        core.close(DisconnectReason::Lost).await;
                        return;
                    }
                    None => {
                        core.close(DisconnectReason::Lost).await;
                        return;
                    }
                }
            }
        }
    }
}

async fn keepalive_loop(core: Arc<ManagerCore>, interval: Duration, max_missed: u32) {
    let mut ticker = tokio::time::interval(interval);
    let mut consecutive_misses = 0u32;
    loop {
        ticker.tick().await;
        if !core.is_open().await {
            return;
        }
        match core.ping().await {
            PingOutcome::Success { rtt_ms } => {
                consecutive_misses = 0;
                debug!(peer = %core.peer(), rtt_ms, "keep-alive ping succeeded");
            }
            PingOutcome::InactiveTab => {
                // Not a miss: we deliberately did not probe this peer.
            }
            PingOutcome::Failed { .. } => {
                consecutive_misses += 1;
                if consecutive_misses >= max_missed {
                    warn!(peer = %core.peer(), "classifying connection as failed after missed keep-alives");
                    core.close(DisconnectReason::KeepAliveTimeout).await;
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl TransportManager for WebSocketManager {
    fn peer(&self) -> NodeId {
        self.core.peer()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn open(&self, initiator: bool, remote_hint: PeerMetadata) -> Result<()> {
        let outcome = self.core.resolve_glare().await;
        use crate::negotiation::NegotiationOutcome::*;
        match outcome {
            AlreadyOpen => return Err(DhtError::Duplicate("already open".to_string())),
            KeepAttempt => return Ok(()),
            PoliteYielded => return Ok(()),
            Proceed => {}
        }

        if !initiator {
            // The caller already has an accepted socket in flight via the listener;
            // nothing more for `open` to do beyond the glare bookkeeping above.
            return Ok(());
        }

        let local_metadata = self.core.local_metadata().await;
        let server_to_browser = local_metadata.node_kind.can_accept_inbound()
            && matches!(remote_hint.node_kind, NodeKind::Browser)
            && remote_hint.listening_addresses.is_empty();

        if server_to_browser {
            self.request_reverse_dial(&remote_hint).await
        } else {
            self.do_outbound_dial(remote_hint).await
        }
    }

    async fn send(&self, payload: FramePayload) -> Result<()> {
        self.core.send(payload).await
    }

    async fn request(&self, payload: FramePayload, timeout: Duration) -> Result<Envelope> {
        self.core.request(payload, timeout).await
    }

    async fn close(&self, reason: DisconnectReason) {
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

    async fn handle_signal(&self, _payload: FramePayload) -> Result<()> {
        Err(DhtError::Protocol(
            "WebSocket transport does not negotiate signaling frames".to_string(),
        ))
    }
}

/// Accepts inbound sockets for a server-capable node (§4.6: "server-side inbound flow").
pub struct WebSocketListener {
    bind_addr: SocketAddr,
    pending_reverse_dials: RwLock<HashMap<NodeId, oneshot::Sender<(WsSocket, PeerMetadata)>>>,
}

/// Handed a brand-new inbound peer the listener has no pending reverse-dial registration
/// for, so it can be routed to (or spin up) the right manager (§4.6, §4.10's no-cache
/// policy: one fresh manager per accepted peer).
#[async_trait]
pub trait InboundAccept: Send + Sync {
    /// Called with the peer id and declared metadata from its `dht_peer_hello`. Returns
    /// the manager that should complete the handshake and own the connection, or `None` to
    /// refuse it (e.g. a duplicate the owner already has `Open`).
    async fn accept(&self, peer: NodeId, remote_metadata: PeerMetadata) -> Option<Arc<WebSocketManager>>;
}

impl WebSocketListener {
    /// Create a listener bound to `bind_addr`. Binding happens lazily in [`Self::serve`].
    pub fn new(bind_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            bind_addr,
            pending_reverse_dials: RwLock::new(HashMap::new()),
        })
    }

    /// Register interest in a reverse dial from `peer`, returning a receiver that
    /// resolves once the listener accepts and identifies a matching inbound socket.
    async fn register_pending_reverse_dial(&self, peer: NodeId) -> oneshot::Receiver<(WsSocket, PeerMetadata)> {
        let (tx, rx) = oneshot::channel();
        self.pending_reverse_dials.write().await.insert(peer, tx);
        rx
    }

    /// Run the accept loop, handing every new socket to [`Self::handle_socket`]. Runs
    /// until the listener fails to bind or the caller drops the returned future.
    pub async fn serve(self: Arc<Self>, on_inbound: Arc<dyn InboundAccept>, first_frame_timeout: Duration) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "websocket listener bound");
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let this = self.clone();
            let on_inbound = on_inbound.clone();
            tokio::spawn(async move {
                if let Err(err) = this.handle_socket(stream, peer_addr, on_inbound, first_frame_timeout).await {
                    debug!(%err, %peer_addr, "inbound websocket connection rejected");
                }
            });
        }
    }

    async fn handle_socket(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        on_inbound: Arc<dyn InboundAccept>,
        first_frame_timeout: Duration,
    ) -> Result<()> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let mut socket = WsSocket::Server(ws);

        let envelope = tokio::time::timeout(first_frame_timeout, read_first_envelope(&mut socket))
            .await
            .map_err(|_| DhtError::Timeout("no first frame from inbound peer".to_string()))??;

        match envelope.payload {
            FramePayload::DhtPeerHello { peer_id, metadata } => {
                let peer =
                    NodeId::from_hex(&peer_id).map_err(|e| DhtError::Protocol(format!("invalid peer id in hello: {e}")))?;
                let remote_metadata =
                    PeerMetadata::try_from(metadata).map_err(|e| DhtError::HandshakeFailed(e.to_string()))?;

                if let Some(waiter) = self.pending_reverse_dials.write().await.remove(&peer) {
                    debug!(%peer, %peer_addr, "matched inbound socket to pending reverse dial");
                    let _ = waiter.send((socket, remote_metadata));
                    return Ok(());
                }

                match on_inbound.accept(peer, remote_metadata.clone()).await {
                    Some(manager) => manager.accept_handoff(socket, remote_metadata).await,
                    None => {
                        socket.close().await;
                        Err(DhtError::Duplicate(format!("no manager accepted peer {peer}")))
                    }
                }
            }
            _ => Err(DhtError::Protocol("expected dht_peer_hello as first inbound frame".to_string())),
        }
    }
}

async fn read_first_envelope(socket: &mut WsSocket) -> Result<Envelope> {
    loop {
        match socket.next_message().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(DhtError::Transport(err.to_string())),
            None => return Err(DhtError::Closed("socket closed before first frame".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn dial_url_prefers_public_address_over_listening_addresses() {
        let metadata = PeerMetadata::new(
            NodeKind::Server,
            vec!["wss://internal.example.invalid/".parse().unwrap()],
            Some("wss://public.example.invalid/".parse().unwrap()),
            HashSet::new(),
            None,
            "1",
            "build-1",
        )
        .unwrap();
        assert_eq!(
            metadata.public_address.as_ref().unwrap().as_str(),
            "wss://public.example.invalid/"
        );
    }
}
