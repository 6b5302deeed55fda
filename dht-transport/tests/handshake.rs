// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Two-node WebSocket handshake over a real loopback socket (§4.5, §4.6).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dht_id::NodeId;
use dht_routing::{NodeKind, PeerMetadata};
use dht_transport::{
    AlwaysVisible, InboundAccept, NoRelay, TransportConfig, TransportFactory, TransportManager,
    WebSocketListener, WebSocketManager,
};

fn metadata(kind: NodeKind, listening: Vec<&str>) -> PeerMetadata {
    PeerMetadata::new(
        kind,
        listening.into_iter().map(|s| s.parse().unwrap()).collect(),
        None,
        HashSet::new(),
        None,
        "1",
        "test-build",
    )
    .unwrap()
}

/// Hands every inbound peer to the one manager this test already built for it. Production
/// builds a fresh manager per accepted peer (§4.10); a fixed two-node test knows in advance
/// which manager that will be.
struct SingleAcceptor {
    manager: Arc<WebSocketManager>,
}

#[async_trait]
impl InboundAccept for SingleAcceptor {
    async fn accept(&self, _peer: NodeId, _metadata: PeerMetadata) -> Option<Arc<WebSocketManager>> {
        Some(self.manager.clone())
    }
}

#[tokio::test]
async fn two_nodes_handshake_and_reach_open() {
    let addr: SocketAddr = "127.0.0.1:18901".parse().unwrap();
    let listener = WebSocketListener::new(addr);

    let node_a_id = NodeId::from_public_key(b"handshake-node-a");
    let node_b_id = NodeId::from_public_key(b"handshake-node-b");

    let factory_a = TransportFactory::new(
        node_a_id,
        NodeKind::Server,
        TransportConfig::default(),
        Arc::new(AlwaysVisible::default()),
        Some(listener.clone()),
    );
    let factory_b = TransportFactory::new(
        node_b_id,
        NodeKind::Server,
        TransportConfig::default(),
        Arc::new(AlwaysVisible::default()),
        None,
    );

    let metadata_a = metadata(NodeKind::Server, vec!["ws://127.0.0.1:18901/"]);
    let metadata_b = metadata(NodeKind::Server, vec![]);

    let manager_a = factory_a.build_websocket(node_b_id, metadata_a.clone(), Arc::new(NoRelay));
    let manager_b = factory_b.build_websocket(node_a_id, metadata_b, Arc::new(NoRelay));

    tokio::spawn(
        listener
            .clone()
            .serve(Arc::new(SingleAcceptor { manager: manager_a.clone() }), Duration::from_secs(5)),
    );
    // Give the accept loop a moment to bind before dialing it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager_b.open(true, metadata_a).await.expect("node b dials node a");

    for _ in 0..50 {
        if manager_a.is_open().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(manager_b.is_open().await, "node b should be open after dialing");
    assert!(manager_a.is_open().await, "node a should be open after accepting the handoff");

    assert!(manager_b.ping().await.succeeded(), "node b should be able to ping node a");
    assert!(manager_a.ping().await.succeeded(), "node a should be able to ping node b");
}
