// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Two browsers dialing each other at the same instant converge to a single `Open`
//! WebRTC data channel (§4.5, §4.7).
//!
//! WebRTC is where this codebase's glare resolution actually has something to arbitrate
//! across two independent peers: each side's own `ConnectionRegistry` starts empty, so
//! `resolve_glare` lets both proceed, and the real collision is negotiated at the SDP
//! layer via `making_offer`/`ignore_offer` (the impolite side drops the polite side's
//! offer; the polite side accepts the incoming offer in place of its own via the WebRTC
//! spec's implicit local-description rollback).

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dht_id::NodeId;
use dht_routing::{NodeKind, PeerMetadata};
use dht_transport::{AlwaysVisible, FramePayload, Result, SignalRelay, TransportConfig, TransportFactory, TransportManager, WebRtcManager};

fn metadata() -> PeerMetadata {
    PeerMetadata::new(NodeKind::Browser, Vec::new(), None, HashSet::new(), Some(true), "1", "test-build").unwrap()
}

/// Forwards signaling frames straight to the peer manager on the other end of a test
/// pair, standing in for whatever carried them in production (a bootstrap relay, per
/// [`dht_transport::rtc`]'s module docs: the data-channel layer is oblivious to how its
/// signaling arrives).
struct LoopbackRelay {
    other: StdMutex<Option<Weak<WebRtcManager>>>,
}

impl LoopbackRelay {
    fn new() -> Arc<Self> {
        Arc::new(Self { other: StdMutex::new(None) })
    }

    fn bind(&self, other: &Arc<WebRtcManager>) {
        *self.other.lock().unwrap() = Some(Arc::downgrade(other));
    }
}

#[async_trait]
impl SignalRelay for LoopbackRelay {
    async fn relay(&self, _peer: NodeId, payload: FramePayload) -> Result<()> {
        let other = self.other.lock().unwrap().clone();
        match other.and_then(|weak| weak.upgrade()) {
            Some(manager) => manager.handle_signal(payload).await,
            None => Ok(()),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_browsers_dialing_each_other_converge_to_one_open_connection() {
    let node_lo = NodeId::from_bytes([0x01; 20]); // polite: lower id
    let node_hi = NodeId::from_bytes([0xff; 20]); // impolite: higher id

    let factory_lo = TransportFactory::new(node_lo, NodeKind::Browser, TransportConfig::default(), Arc::new(AlwaysVisible::default()), None);
    let factory_hi = TransportFactory::new(node_hi, NodeKind::Browser, TransportConfig::default(), Arc::new(AlwaysVisible::default()), None);

    let relay_lo = LoopbackRelay::new();
    let relay_hi = LoopbackRelay::new();

    let manager_lo = factory_lo.build_webrtc(node_hi, metadata(), relay_lo.clone());
    let manager_hi = factory_hi.build_webrtc(node_lo, metadata(), relay_hi.clone());

    relay_lo.bind(&manager_hi);
    relay_hi.bind(&manager_lo);

    let (opened_lo, opened_hi) = tokio::join!(manager_lo.open(true, metadata()), manager_hi.open(true, metadata()));
    opened_lo.expect("polite peer's simultaneous open resolves");
    opened_hi.expect("impolite peer's simultaneous open resolves");

    for _ in 0..150 {
        if manager_lo.is_open().await && manager_hi.is_open().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(manager_lo.is_open().await, "polite peer should still reach exactly one open connection");
    assert!(manager_hi.is_open().await, "impolite peer should still reach exactly one open connection");
}
