// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! The seam a transport manager uses to ask its owner to relay a frame it cannot deliver
//! on its own connection (§4.6's `connection_request`, §4.7's offer/answer/candidate
//! relay, §4.9's signal relaying).
//!
//! A manager never reaches into another manager or into the bootstrap client directly
//! (§9: break cyclic references with a weak back-reference). Instead the component that
//! owns every manager for this node — the Kademlia layer, in practice — implements
//! [`SignalRelay`] and hands a clone of it to each manager the [`crate::factory`] builds.

use async_trait::async_trait;
use dht_id::NodeId;

use crate::envelope::FramePayload;
use crate::error::Result;

/// Deliver a signaling or control frame to `peer` on the caller's behalf, preferably over
/// an existing DHT connection, falling back to the bootstrap client if no such connection
/// exists (§4.9). Implemented by the Kademlia layer.
#[async_trait]
pub trait SignalRelay: Send + Sync {
    /// Relay `payload`, addressed to `peer`.
    async fn relay(&self, peer: NodeId, payload: FramePayload) -> Result<()>;
}

/// A [`SignalRelay`] that always fails, for managers constructed without one wired up yet
/// (e.g. in isolation during tests).
#[derive(Debug, Default)]
pub struct NoRelay;

#[async_trait]
impl SignalRelay for NoRelay {
    async fn relay(&self, _peer: NodeId, _payload: FramePayload) -> Result<()> {
        Err(crate::error::DhtError::NoReachableAddress)
    }
}
