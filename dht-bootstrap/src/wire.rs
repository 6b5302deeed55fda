// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Bootstrap wire frames (§4.8, §6).
//!
//! Separate from [`dht_transport::FramePayload`]: the bootstrap link speaks a distinct
//! admission/discovery/relay vocabulary, though it carries `FramePayload` values verbatim
//! inside [`BootstrapFrame::RelaySignal`] when forwarding WebRTC signaling on a peer's
//! behalf (§4.9's "dropped back to `BootstrapClient` as a last resort").

use dht_transport::{FramePayload, WireMetadata, WireNode};
use serde::{Deserialize, Serialize};

/// A single JSON frame exchanged with a bootstrap endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BootstrapFrame {
    /// Client → server: admission request.
    Register {
        node_id: String,
        protocol_version: String,
        build_id: String,
        metadata: WireMetadata,
    },
    /// Server → client: proof-of-possession challenge.
    AuthChallenge { nonce: String, timestamp: i64 },
    /// Client → server: signs `nonce || ":" || timestamp` with the node's identity key.
    AuthResponse {
        #[serde(rename = "signature")]
        signature_hex: String,
    },
    /// Server → client: admission succeeded.
    Registered,
    /// Server → client: fatal, the link is about to close with code `4001`.
    VersionMismatch {
        client_version: String,
        server_version: String,
        client_build_id: String,
        server_build_id: String,
    },
    /// Client → server: ask for up to `max_peers` contacts, or genesis status.
    GetPeersOrGenesis {
        #[serde(rename = "maxPeers")]
        max_peers: usize,
    },
    /// Server → client: generic response envelope, currently only used to answer
    /// `get_peers_or_genesis`.
    Response {
        success: bool,
        data: Option<PeersOrGenesisData>,
    },
    /// Client → server: ask the server to introduce this node to `target_node_id`.
    CreateInvitationForPeer { target_node_id: String },
    /// Server → target: deliver an invitation on the inviter's behalf. Called
    /// `invitation_for_bridge`/`forward_invitation` interchangeably in the wire
    /// catalogue; this crate treats both names as this one frame.
    InvitationForBridge { inviter_node_id: String },
    /// Target → server → inviter: the target's listener is up, dial here.
    ListeningAddress {
        target_node_id: String,
        listening_address: String,
    },
    /// Either direction: forward a DHT signal frame to/from a peer that has no
    /// reachable `TransportManager`, e.g. two browsers with no common DHT path.
    RelaySignal {
        #[serde(rename = "toPeerId")]
        to_peer_id: Option<String>,
        #[serde(rename = "fromPeerId")]
        from_peer_id: Option<String>,
        payload: FramePayload,
    },
    /// Anything this client doesn't recognise; logged and ignored (§7).
    #[serde(other)]
    Unknown,
}

/// Payload of a [`BootstrapFrame::Response`] answering `get_peers_or_genesis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersOrGenesisData {
    #[serde(rename = "isGenesis")]
    pub is_genesis: bool,
    #[serde(default)]
    pub peers: Vec<WireNode>,
}
