// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Core types shared by the connection, negotiation, and manager modules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A connection's position in its lifecycle (§4.5 data model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt is in progress.
    Idle,
    /// A transport-level dial is in flight.
    Connecting,
    /// The transport is open; the handshake frame pair has not completed yet.
    Handshaking,
    /// The handshake completed; the connection is usable.
    Open,
    /// A graceful close is in progress.
    Closing,
    /// The connection attempt or an established connection failed.
    Failed(String),
    /// The connection has fully closed.
    Closed,
}

impl ConnectionState {
    /// Whether this state already counts as "owns an open connection" for the
    /// at-most-one-`Open`-connection invariant.
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Whether a connection in this state is mid-attempt and can still be yielded during
    /// glare resolution.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Handshaking)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Handshaking => write!(f, "handshaking"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Which side initiated a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionDirection {
    /// The local node called `open`.
    Outbound,
    /// The peer dialed in, or relayed a signal that started the attempt.
    Inbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Outbound => write!(f, "outbound"),
            ConnectionDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Which concrete transport a connection uses (§4.10's `TransportFactory` output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// `tokio-tungstenite`-backed WebSocket connection.
    WebSocket,
    /// `webrtc`-backed peer connection with a single ordered reliable data channel.
    WebRtc,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "ws"),
            TransportKind::WebRtc => write!(f, "rtc"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_open_counts_as_owning_a_connection() {
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Handshaking.is_open());
    }

    #[test]
    fn in_flight_states_are_connecting_and_handshaking() {
        assert!(ConnectionState::Connecting.is_in_flight());
        assert!(ConnectionState::Handshaking.is_in_flight());
        assert!(!ConnectionState::Open.is_in_flight());
        assert!(!ConnectionState::Idle.is_in_flight());
    }
}
