// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Errors the Kademlia layer can return (§7, narrowed to this layer's concerns).

use thiserror::Error;

/// Result type used throughout `dht-kad`.
pub type Result<T> = std::result::Result<T, KadError>;

/// Everything that can go wrong servicing a DHT operation.
#[derive(Debug, Error)]
pub enum KadError {
    /// No peer in the routing table was reachable for this operation.
    #[error("no reachable peers")]
    NoPeers,

    /// A `find_node` call against this peer was rejected locally for running too hot
    /// (§4.9's rate limiting).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The iterative lookup's overall deadline elapsed.
    #[error("query timed out")]
    Timeout,

    /// A lower-level transport error surfaced while servicing this operation.
    #[error(transparent)]
    Transport(#[from] dht_transport::DhtError),

    /// A malformed or unexpected response arrived for a request this layer issued.
    #[error("protocol error: {0}")]
    Protocol(String),
}
