// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! `TransportFactory` (§4.10): picks the right concrete transport for a peer edge and
//! builds a fresh, single-use manager for it.
//!
//! There is no manager cache here by design: every call to [`TransportFactory::build`]
//! returns a brand-new manager, seeded with the local node's own metadata so its handshake
//! payload never needs a round-trip. Reuse across repeated `open` calls to the same peer
//! is the caller's responsibility (the Kademlia layer keeps the manager it built for as
//! long as it needs the peer), not this factory's.

use std::sync::Arc;

use dht_id::NodeId;
use dht_routing::{NodeKind, PeerMetadata};

use crate::config::TransportConfig;
use crate::host::HostEnvironment;
use crate::manager::{ManagerCore, TransportManager};
use crate::rtc::WebRtcManager;
use crate::signal::SignalRelay;
use crate::types::TransportKind;
use crate::ws::{WebSocketListener, WebSocketManager};

/// Builds [`TransportManager`] instances, choosing WebSocket or WebRTC per §4.10's rules:
///
/// - browser ↔ browser: WebRTC
/// - anything else involving a browser: WebSocket, with the browser side always the client
/// - server ↔ server: WebSocket
///
/// A peer whose kind is not yet known is treated as a server if it has advertised
/// listening addresses, and as a browser otherwise.
pub struct TransportFactory {
    local_id: NodeId,
    local_kind: NodeKind,
    config: TransportConfig,
    host: Arc<dyn HostEnvironment>,
    listener: Option<Arc<WebSocketListener>>,
}

impl TransportFactory {
    /// Construct a factory for this node. `listener` should be `Some` only for
    /// server-capable nodes, since only they can be asked to accept a reverse dial
    /// (§4.6).
    pub fn new(
        local_id: NodeId,
        local_kind: NodeKind,
        config: TransportConfig,
        host: Arc<dyn HostEnvironment>,
        listener: Option<Arc<WebSocketListener>>,
    ) -> Self {
        Self {
            local_id,
            local_kind,
            config,
            host,
            listener,
        }
    }

    /// Infer a peer's kind from its advertised metadata when it hasn't announced one
    /// explicitly: a peer with no listening addresses cannot accept inbound connections
    /// and is treated as a browser (§4.10).
    fn effective_kind(metadata: &PeerMetadata) -> NodeKind {
        if metadata.is_effectively_browser() {
            NodeKind::Browser
        } else {
            metadata.node_kind
        }
    }

    fn pick_kind(&self, remote_metadata: &PeerMetadata) -> TransportKind {
        let remote_kind = Self::effective_kind(remote_metadata);
        match (self.local_kind, remote_kind) {
            (NodeKind::Browser, NodeKind::Browser) => TransportKind::WebRtc,
            _ => TransportKind::WebSocket,
        }
    }

    /// Build a fresh manager dedicated to `peer`, already seeded with `local_metadata`
    /// (the local node's own advertised metadata) so the handshake's outbound frame is
    /// complete without waiting on a round-trip.
    pub fn build(
        &self,
        peer: NodeId,
        remote_metadata: &PeerMetadata,
        local_metadata: PeerMetadata,
        signal_relay: Arc<dyn SignalRelay>,
    ) -> Arc<dyn TransportManager> {
        match self.pick_kind(remote_metadata) {
            TransportKind::WebSocket => self.build_websocket(peer, local_metadata, signal_relay),
            TransportKind::WebRtc => self.build_webrtc(peer, local_metadata, signal_relay),
        }
    }

    /// Build a WebSocket-specific manager directly, bypassing kind selection. Used by the
    /// listener's inbound-accept path (§4.6), which already knows the accepted socket is a
    /// WebSocket edge and needs the concrete type to complete the handoff handshake.
    pub fn build_websocket(
        &self,
        peer: NodeId,
        local_metadata: PeerMetadata,
        signal_relay: Arc<dyn SignalRelay>,
    ) -> Arc<WebSocketManager> {
        let core = Arc::new(ManagerCore::new(
            self.local_id,
            peer,
            TransportKind::WebSocket,
            self.config.clone(),
            self.host.clone(),
            local_metadata,
        ));
        Arc::new(WebSocketManager::new(core, signal_relay, self.listener.clone()))
    }

    /// Build a WebRTC-specific manager directly and start its tab-visibility-aware
    /// keep-alive loop (§4.7).
    pub fn build_webrtc(
        &self,
        peer: NodeId,
        local_metadata: PeerMetadata,
        signal_relay: Arc<dyn SignalRelay>,
    ) -> Arc<WebRtcManager> {
        let core = Arc::new(ManagerCore::new(
            self.local_id,
            peer,
            TransportKind::WebRtc,
            self.config.clone(),
            self.host.clone(),
            local_metadata,
        ));
        let manager = Arc::new(WebRtcManager::new(core, signal_relay));
        tokio::spawn(manager.clone().keepalive_loop(self.host.clone()));
        manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::AlwaysVisible;
    use crate::signal::NoRelay;
    use std::collections::HashSet;

    fn metadata(kind: NodeKind, listening: Vec<&str>) -> PeerMetadata {
        PeerMetadata::new(
            kind,
            listening.into_iter().map(|s| s.parse().unwrap()).collect(),
            None,
            HashSet::new(),
            None,
            "1",
            "build-1",
        )
        .unwrap()
    }

    fn factory(local_kind: NodeKind) -> TransportFactory {
        TransportFactory::new(
            NodeId::from_public_key(b"local"),
            local_kind,
            TransportConfig::default(),
            Arc::new(AlwaysVisible::default()),
            None,
        )
    }

    #[test]
    fn browser_to_browser_uses_webrtc() {
        let factory = factory(NodeKind::Browser);
        let remote = metadata(NodeKind::Browser, vec![]);
        assert_eq!(factory.pick_kind(&remote), TransportKind::WebRtc);
    }

    #[test]
    fn server_to_browser_uses_websocket() {
        let factory = factory(NodeKind::Server);
        let remote = metadata(NodeKind::Browser, vec![]);
        assert_eq!(factory.pick_kind(&remote), TransportKind::WebSocket);
    }

    #[test]
    fn server_to_server_uses_websocket() {
        let factory = factory(NodeKind::Server);
        let remote = metadata(NodeKind::Server, vec!["wss://peer.example.invalid/"]);
        assert_eq!(factory.pick_kind(&remote), TransportKind::WebSocket);
    }

    #[test]
    fn unknown_kind_without_listening_addresses_is_treated_as_browser() {
        let factory = factory(NodeKind::Browser);
        let remote = metadata(NodeKind::Bridge, vec![]);
        assert_eq!(factory.pick_kind(&remote), TransportKind::WebRtc);
    }

    #[test]
    fn build_produces_a_manager_of_the_chosen_kind() {
        let factory = factory(NodeKind::Server);
        let remote = metadata(NodeKind::Server, vec!["wss://peer.example.invalid/"]);
        let local = metadata(NodeKind::Server, vec!["wss://local.example.invalid/"]);
        let manager = factory.build(NodeId::from_public_key(b"peer"), &remote, local, Arc::new(NoRelay));
        assert_eq!(manager.kind(), TransportKind::WebSocket);
    }
}
