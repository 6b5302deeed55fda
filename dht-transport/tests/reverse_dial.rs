// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! A server reaching a browser peer it cannot dial directly, via reverse dial (§4.6).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dht_id::NodeId;
use dht_routing::{NodeKind, PeerMetadata};
use dht_transport::{
    AlwaysVisible, DhtError, FramePayload, InboundAccept, Result, SignalRelay, TransportConfig, TransportFactory, TransportManager,
    WebSocketListener, WebSocketManager,
};

fn server_metadata(listening: Vec<&str>) -> PeerMetadata {
    PeerMetadata::new(
        NodeKind::Server,
        listening.into_iter().map(|s| s.parse().unwrap()).collect(),
        None,
        HashSet::new(),
        None,
        "1",
        "test-build",
    )
    .unwrap()
}

fn browser_metadata() -> PeerMetadata {
    PeerMetadata::new(NodeKind::Browser, Vec::new(), None, HashSet::new(), Some(true), "1", "test-build").unwrap()
}

/// Never claims an inbound peer; every socket this listener sees during these tests is
/// either a matched reverse dial (handled before `on_inbound` is consulted) or unexpected.
struct NoAccept;

#[async_trait]
impl InboundAccept for NoAccept {
    async fn accept(&self, _peer: NodeId, _metadata: PeerMetadata) -> Option<Arc<WebSocketManager>> {
        None
    }
}

/// Stands in for the Kademlia layer's `handle_signal` routing of a relayed
/// `connection_request`: dials the browser's own manager back at the address the frame
/// carries (§4.6, mirrors `Inner::handle_signal`'s `ConnectionRequest` arm).
struct DialBack {
    browser_manager: Arc<WebSocketManager>,
}

#[async_trait]
impl SignalRelay for DialBack {
    async fn relay(&self, _peer: NodeId, payload: FramePayload) -> Result<()> {
        let FramePayload::ConnectionRequest { listening_address, .. } = payload else {
            return Ok(());
        };
        let hint = server_metadata(vec![listening_address.as_str()]);
        self.browser_manager.open(true, hint).await
    }
}

/// Drops every signal, simulating a browser peer that never reverse-dials back.
struct DropSignal;

#[async_trait]
impl SignalRelay for DropSignal {
    async fn relay(&self, _peer: NodeId, _payload: FramePayload) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn server_reverse_dial_to_browser_succeeds() {
    let addr: SocketAddr = "127.0.0.1:18903".parse().unwrap();
    let listener = WebSocketListener::new(addr);

    let server_id = NodeId::from_public_key(b"reverse-dial-server");
    let browser_id = NodeId::from_public_key(b"reverse-dial-browser");

    let factory_server = TransportFactory::new(
        server_id,
        NodeKind::Server,
        TransportConfig::default(),
        Arc::new(AlwaysVisible::default()),
        Some(listener.clone()),
    );
    let factory_browser = TransportFactory::new(browser_id, NodeKind::Browser, TransportConfig::default(), Arc::new(AlwaysVisible::default()), None);

    let browser_manager = factory_browser.build_websocket(server_id, browser_metadata(), Arc::new(DropSignal));
    let relay = Arc::new(DialBack {
        browser_manager: browser_manager.clone(),
    });
    let server_manager = factory_server.build_websocket(browser_id, server_metadata(vec![format!("ws://{addr}/").as_str()]), relay);

    tokio::spawn(listener.clone().serve(Arc::new(NoAccept), Duration::from_secs(5)));
    tokio::time::sleep(Duration::from_millis(50)).await;

    server_manager
        .open(true, browser_metadata())
        .await
        .expect("server resolves the reverse dial to the browser");

    assert!(server_manager.is_open().await, "server's manager should be open once the browser dials back");
    assert!(browser_manager.is_open().await, "browser's own manager should be open after dialing the server");
}

#[tokio::test]
async fn reverse_dial_times_out_when_the_browser_never_calls_back() {
    let addr: SocketAddr = "127.0.0.1:18904".parse().unwrap();
    let listener = WebSocketListener::new(addr);

    let server_id = NodeId::from_public_key(b"reverse-dial-server-b");
    let browser_id = NodeId::from_public_key(b"reverse-dial-browser-b");

    let mut config = TransportConfig::default();
    config.reverse_dial_timeout = Duration::from_millis(100);

    let factory_server = TransportFactory::new(server_id, NodeKind::Server, config, Arc::new(AlwaysVisible::default()), Some(listener.clone()));

    let server_manager = factory_server.build_websocket(browser_id, server_metadata(vec![format!("ws://{addr}/").as_str()]), Arc::new(DropSignal));

    tokio::spawn(listener.clone().serve(Arc::new(NoAccept), Duration::from_secs(5)));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = server_manager
        .open(true, browser_metadata())
        .await
        .expect_err("no reverse dial ever arrives, since the relay drops the connection_request");

    assert!(matches!(err, DhtError::NoReverseDial), "expected NoReverseDial, got {err:?}");
}
