// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Wire frame types (§6).
//!
//! Every frame is a JSON object carrying `type`, `from`, and `timestamp`; requests carry
//! `requestId` and responses echo it back. The base transport layer adds `from`/`timestamp`
//! on send (§4.4), so callers only ever construct a [`FramePayload`].

use std::collections::HashSet;
use std::convert::TryFrom;

use dht_id::NodeId;
use dht_routing::{MetadataError, NodeKind, PeerMetadata};
use serde::{Deserialize, Serialize};
use url::Url;

/// A complete wire frame: the base envelope fields plus a typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Hex-encoded sender node id.
    pub from: String,
    /// Unix milliseconds at send time.
    pub timestamp: i64,
    /// The frame's typed payload.
    #[serde(flatten)]
    pub payload: FramePayload,
}

impl Envelope {
    /// Wrap a payload with the sender id and current time, as the base transport layer
    /// does on every send.
    pub fn new(from: NodeId, payload: FramePayload) -> Self {
        Self {
            from: from.to_hex(),
            timestamp: now_unix_ms(),
            payload,
        }
    }

    /// Parse the sender's `NodeId` out of the envelope.
    pub fn sender(&self) -> Result<NodeId, dht_id::NodeIdError> {
        NodeId::from_hex(&self.from)
    }
}

fn now_unix_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The minimal frame catalogue from §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FramePayload {
    /// Keep-alive probe. Expects a `pong` in response.
    Ping,
    /// Reply to `ping`, echoing the original timestamp.
    Pong {
        /// The `timestamp` field from the `ping` this answers.
        #[serde(rename = "originalTimestamp")]
        original_timestamp: i64,
    },
    /// Iterative lookup request.
    FindNode {
        /// Hex-encoded target id.
        target: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    /// Reply to `find_node`.
    FindNodeResponse {
        nodes: Vec<WireNode>,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    /// Value lookup request.
    FindValue {
        key: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    /// Reply to `find_value`: either the value, or the closest nodes if not found.
    FindValueResponse {
        value: Option<String>,
        #[serde(default)]
        nodes: Vec<WireNode>,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    /// Store-value request.
    Store {
        key: String,
        value: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    /// Reply to `store`.
    StoreResponse {
        ok: bool,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    /// A relayed WebRTC SDP offer.
    ConnectionOffer {
        signal: serde_json::Value,
        #[serde(rename = "toPeerId")]
        to_peer_id: String,
    },
    /// A relayed WebRTC SDP answer.
    ConnectionAnswer {
        signal: serde_json::Value,
        #[serde(rename = "toPeerId")]
        to_peer_id: String,
    },
    /// A relayed WebRTC ICE candidate.
    ConnectionCandidate {
        signal: serde_json::Value,
        #[serde(rename = "toPeerId")]
        to_peer_id: String,
    },
    /// Sent by a server that wants a browser peer to dial it back (§4.6).
    ConnectionRequest {
        #[serde(rename = "listeningAddress")]
        listening_address: String,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    /// Outbound handshake frame (§4.5).
    DhtPeerHello {
        #[serde(rename = "peerId")]
        peer_id: String,
        metadata: WireMetadata,
    },
    /// Inbound handshake acknowledgement (§4.5).
    DhtPeerConnected {
        #[serde(rename = "bridgeNodeId")]
        bridge_node_id: String,
        success: bool,
        metadata: WireMetadata,
    },
    /// WebRTC-only application-layer keep-alive probe (§4.7).
    KeepAlivePing {
        #[serde(rename = "pingId")]
        ping_id: String,
    },
    /// Reply to `keep_alive_ping`.
    KeepAlivePong {
        #[serde(rename = "pingId")]
        ping_id: String,
    },
    /// Any frame type this node doesn't recognize. Forwarded to the application layer
    /// unmodified rather than rejected, per §4.4.
    #[serde(other)]
    Unknown,
}

impl FramePayload {
    /// The `requestId` carried by request/response-shaped payloads, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            FramePayload::FindNode { request_id, .. }
            | FramePayload::FindNodeResponse { request_id, .. }
            | FramePayload::FindValue { request_id, .. }
            | FramePayload::FindValueResponse { request_id, .. }
            | FramePayload::Store { request_id, .. }
            | FramePayload::StoreResponse { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

/// The wire representation of [`PeerMetadata`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMetadata {
    pub node_kind: String,
    #[serde(default)]
    pub listening_addresses: Vec<String>,
    pub public_address: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub tab_visible: Option<bool>,
    pub protocol_version: String,
    pub build_id: String,
    pub rtt_ms: Option<u64>,
}

/// Errors converting between wire and in-memory peer metadata.
#[derive(Debug, thiserror::Error)]
pub enum WireMetadataError {
    #[error("unknown node_kind: {0}")]
    UnknownNodeKind(String),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl From<&PeerMetadata> for WireMetadata {
    fn from(metadata: &PeerMetadata) -> Self {
        Self {
            node_kind: match metadata.node_kind {
                NodeKind::Server => "server",
                NodeKind::Browser => "browser",
                NodeKind::Bridge => "bridge",
            }
            .to_string(),
            listening_addresses: metadata
                .listening_addresses
                .iter()
                .map(Url::to_string)
                .collect(),
            public_address: metadata.public_address.as_ref().map(Url::to_string),
            capabilities: metadata.capabilities.iter().cloned().collect(),
            tab_visible: metadata.tab_visible,
            protocol_version: metadata.protocol_version.clone(),
            build_id: metadata.build_id.clone(),
            rtt_ms: metadata.rtt_ms,
        }
    }
}

impl TryFrom<WireMetadata> for PeerMetadata {
    type Error = WireMetadataError;

    fn try_from(wire: WireMetadata) -> Result<Self, Self::Error> {
        let node_kind = match wire.node_kind.as_str() {
            "server" => NodeKind::Server,
            "browser" => NodeKind::Browser,
            "bridge" => NodeKind::Bridge,
            other => return Err(WireMetadataError::UnknownNodeKind(other.to_string())),
        };
        let listening_addresses = wire
            .listening_addresses
            .iter()
            .map(|s| Url::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        let public_address = wire
            .public_address
            .as_deref()
            .map(Url::parse)
            .transpose()?;
        let capabilities: HashSet<String> = wire.capabilities.into_iter().collect();

        let mut metadata = PeerMetadata::new(
            node_kind,
            listening_addresses,
            public_address,
            capabilities,
            wire.tab_visible,
            wire.protocol_version,
            wire.build_id,
        )?;
        metadata.rtt_ms = wire.rtt_ms;
        Ok(metadata)
    }
}

/// A peer reference returned in `find_node`/`find_value` responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireNode {
    pub node_id: String,
    pub metadata: WireMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample_metadata() -> PeerMetadata {
        PeerMetadata::new(
            NodeKind::Server,
            vec!["wss://node.example.invalid/".parse().unwrap()],
            None,
            HashSet::new(),
            None,
            "1",
            "build-1",
        )
        .unwrap()
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let id = NodeId::from_public_key(b"envelope-test");
        let envelope = Envelope::new(
            id,
            FramePayload::Ping,
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.from, id.to_hex());
        assert!(matches!(parsed.payload, FramePayload::Ping));
    }

    #[test]
    fn unknown_frame_type_is_tolerated() {
        let json = r#"{"from":"aa","timestamp":1,"type":"some_future_type","extra":true}"#;
        let parsed: Envelope = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed.payload, FramePayload::Unknown));
    }

    #[test]
    fn metadata_round_trips_through_wire_form() {
        let metadata = sample_metadata();
        let wire = WireMetadata::from(&metadata);
        let restored = PeerMetadata::try_from(wire).unwrap();
        assert_eq!(restored.node_kind, metadata.node_kind);
        assert_eq!(restored.listening_addresses, metadata.listening_addresses);
    }

    #[test]
    fn find_node_request_id_is_extracted() {
        let payload = FramePayload::FindNode {
            target: "deadbeef".to_string(),
            request_id: "req-1".to_string(),
        };
        assert_eq!(payload.request_id(), Some("req-1"));
        assert_eq!(FramePayload::Ping.request_id(), None);
    }
}
