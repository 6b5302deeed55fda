// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Per-peer metadata attached to routing table entries.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// The kind of node a peer is, which determines reachability and transport choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A long-lived node with a public listener address.
    Server,
    /// A transient in-browser node with no listener, reachable only via WebRTC or a
    /// reverse dial it initiates itself.
    Browser,
    /// A server-role node additionally permitted to bridge/relay for browser peers.
    Bridge,
}

impl NodeKind {
    /// Whether this kind of node can accept inbound connections.
    pub fn can_accept_inbound(self) -> bool {
        !matches!(self, NodeKind::Browser)
    }
}

/// Errors returned when constructing a [`PeerMetadata`] that violates its invariants.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    /// A `browser` peer was given one or more listening addresses, or no `tab_visible`
    /// signal — both are required to be the opposite for browsers.
    #[error("browser peer metadata must have empty listening_addresses and a defined tab_visible")]
    InvalidBrowserMetadata,
}

/// Metadata attached to each routing-table entry, replaced atomically on handshake or
/// explicit refresh — callers never get a handle to mutate it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMetadata {
    /// What kind of node this peer is.
    pub node_kind: NodeKind,
    /// Addresses the peer listens on. Always empty for `browser` peers.
    pub listening_addresses: Vec<Url>,
    /// The address other nodes should use to reach this peer from outside its local
    /// network, if known.
    pub public_address: Option<Url>,
    /// Free-form capability tags the peer advertised at handshake time.
    pub capabilities: HashSet<String>,
    /// Whether the peer's host tab is currently visible. Only meaningful for `browser`
    /// peers; always `None` for non-browser peers.
    pub tab_visible: Option<bool>,
    /// The DHT wire protocol version this peer speaks.
    pub protocol_version: String,
    /// Build identifier the peer reported, used for `version_mismatch` classification
    /// during bootstrap admission.
    pub build_id: String,
    /// Last time this peer was observed (handshake, pong, or any received frame).
    pub last_seen: DateTime<Utc>,
    /// Most recent round-trip latency sample, if any ping has succeeded.
    pub rtt_ms: Option<u64>,
}

impl PeerMetadata {
    /// Construct metadata for a server (or bridge) peer, validating the invariant that
    /// browsers carry no listening addresses.
    pub fn new(
        node_kind: NodeKind,
        listening_addresses: Vec<Url>,
        public_address: Option<Url>,
        capabilities: HashSet<String>,
        tab_visible: Option<bool>,
        protocol_version: impl Into<String>,
        build_id: impl Into<String>,
    ) -> Result<Self, MetadataError> {
        let is_browser = node_kind == NodeKind::Browser;
        if is_browser && (!listening_addresses.is_empty() || tab_visible.is_none()) {
            return Err(MetadataError::InvalidBrowserMetadata);
        }
        Ok(Self {
            node_kind,
            listening_addresses,
            public_address,
            capabilities,
            tab_visible,
            protocol_version: protocol_version.into(),
            build_id: build_id.into(),
            last_seen: Utc::now(),
            rtt_ms: None,
        })
    }

    /// Whether this peer's metadata indicates it currently has no reachable listener,
    /// i.e. is effectively a browser for connection-selection purposes (§4.10), inferring
    /// from address presence when `node_kind` is ambiguous.
    pub fn is_effectively_browser(&self) -> bool {
        self.node_kind == NodeKind::Browser && self.listening_addresses.is_empty()
    }

    /// Whether the peer's tab is currently inactive (hidden). `None` (non-browser peers,
    /// or unknown) is treated as active.
    pub fn is_inactive_browser_tab(&self) -> bool {
        self.node_kind == NodeKind::Browser && self.tab_visible == Some(false)
    }
}
