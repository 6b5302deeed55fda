// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! The uniform event stream a [`crate::manager::TransportManager`] emits, regardless of
//! whether the underlying connection is a WebSocket or a WebRTC data channel (§4.3).

use dht_id::NodeId;
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// A single event surfaced by a transport manager's event stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A connection to `peer` finished the handshake and is ready for use.
    PeerConnected {
        peer: NodeId,
    },
    /// The connection to `peer` closed, for the given reason.
    PeerDisconnected {
        peer: NodeId,
        reason: DisconnectReason,
    },
    /// A DHT protocol frame arrived from `peer`.
    DhtMessage {
        peer: NodeId,
        envelope: Envelope,
    },
    /// A signaling frame (offer/answer/candidate/connection-request) arrived, either
    /// directly from `peer` or relayed through the bootstrap server on its behalf.
    Signal {
        peer: NodeId,
        envelope: Envelope,
    },
    /// A keep-alive `pong` arrived, with the measured round-trip time.
    Pong {
        peer: NodeId,
        rtt_ms: u64,
    },
}

impl TransportEvent {
    /// The peer this event concerns.
    pub fn peer(&self) -> NodeId {
        match self {
            TransportEvent::PeerConnected { peer }
            | TransportEvent::PeerDisconnected { peer, .. }
            | TransportEvent::DhtMessage { peer, .. }
            | TransportEvent::Signal { peer, .. }
            | TransportEvent::Pong { peer, .. } => *peer,
        }
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The local side closed the connection deliberately.
    LocalClose,
    /// The remote side closed the connection.
    RemoteClose,
    /// The transport-level connection dropped unexpectedly (socket error, ICE failure).
    Lost,
    /// The peer failed to answer keep-alive pings within the deadline (§4.7).
    KeepAliveTimeout,
    /// The handshake did not complete before its deadline.
    HandshakeTimeout,
    /// The peer was evicted to admit a higher-priority connection under the
    /// per-peer-kind cap (§4.10).
    Evicted,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisconnectReason::LocalClose => "local close",
            DisconnectReason::RemoteClose => "remote close",
            DisconnectReason::Lost => "connection lost",
            DisconnectReason::KeepAliveTimeout => "keep-alive timeout",
            DisconnectReason::HandshakeTimeout => "handshake timeout",
            DisconnectReason::Evicted => "evicted",
        };
        write!(f, "{s}")
    }
}

/// Identifier correlating a request frame with its eventual response (§6).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new random request id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an id already received on the wire.
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The wire representation of this id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn event_peer_accessor_matches_variant() {
        let peer = NodeId::from_public_key(b"event-test");
        let event = TransportEvent::PeerConnected { peer };
        assert_eq!(event.peer(), peer);
    }

    #[test]
    fn disconnect_reason_displays_readably() {
        assert_eq!(DisconnectReason::KeepAliveTimeout.to_string(), "keep-alive timeout");
    }
}
