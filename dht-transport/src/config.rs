// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Transport-layer configuration, with the defaults enumerated in §6.

use std::time::Duration;

/// ICE server configuration for the WebRTC transport: a STUN server and at least two TURN
/// relays, one of which should offer a TCP:443 fallback for networks that block UDP.
#[derive(Debug, Clone)]
pub struct IceServer {
    /// The `stun:`/`turn:`/`turns:` URL.
    pub urls: Vec<String>,
    /// TURN username, if this entry is a TURN relay.
    pub username: Option<String>,
    /// TURN credential, if this entry is a TURN relay.
    pub credential: Option<String>,
}

/// Configuration for [`crate::manager::TransportManager`] implementations.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Deadline for a `request`/response round trip (§6: `request_timeout_ms`).
    pub request_timeout: Duration,
    /// Deadline for a `ping` (§6: `ping_timeout_ms`).
    pub ping_timeout: Duration,
    /// Overall deadline for a connection attempt, from `open` to `Open` (§5, §6:
    /// `connection_timeout_ms`).
    pub connection_timeout: Duration,
    /// How long a server waits for a browser peer's reverse dial before failing `open`
    /// with `NoReverseDial` (§4.6).
    pub reverse_dial_timeout: Duration,
    /// Pause a polite peer waits for an inbound connection before resuming its own dial
    /// (§4.5).
    pub glare_yield_pause: Duration,
    /// `WebSocketTransport` periodic keep-alive ping interval (§4.6).
    pub ws_ping_interval: Duration,
    /// `WebRTCTransport` keep-alive ping interval while the host tab is visible (§6:
    /// `keepalive_visible_ms`).
    pub keepalive_visible_interval: Duration,
    /// `WebRTCTransport` keep-alive ping interval while the host tab is hidden (§6:
    /// `keepalive_hidden_ms`).
    pub keepalive_hidden_interval: Duration,
    /// Deadline for a keep-alive pong before it counts as missed (§6: `keepalive_timeout_ms`).
    pub keepalive_timeout: Duration,
    /// Consecutive missed keep-alive pongs before a WebRTC connection is classified as
    /// failed (§4.7: "two consecutive missed pongs").
    pub max_missed_keepalives: u32,
    /// Consecutive missed periodic pings before a WebSocket connection is classified as
    /// failed (§4.6: "three consecutive missed responses").
    pub ws_max_missed_pings: u32,
    /// Deadline for the first frame a WebSocket server expects after accepting a socket
    /// (§4.6).
    pub server_first_frame_timeout: Duration,
    /// How long the WebRTC transport waits for ICE gathering to begin before sending the
    /// local answer (§4.7).
    pub ice_gathering_grace: Duration,
    /// ICE servers offered to every `WebRTCTransport` peer connection.
    pub ice_servers: Vec<IceServer>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(10_000),
            ping_timeout: Duration::from_millis(5_000),
            connection_timeout: Duration::from_millis(45_000),
            reverse_dial_timeout: Duration::from_secs(15),
            glare_yield_pause: crate::negotiation::DEFAULT_GLARE_YIELD_PAUSE,
            ws_ping_interval: Duration::from_secs(30),
            keepalive_visible_interval: Duration::from_millis(30_000),
            keepalive_hidden_interval: Duration::from_millis(10_000),
            keepalive_timeout: Duration::from_millis(60_000),
            max_missed_keepalives: 2,
            ws_max_missed_pings: 3,
            server_first_frame_timeout: Duration::from_secs(10),
            ice_gathering_grace: Duration::from_secs(1),
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = TransportConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.ping_timeout, Duration::from_secs(5));
        assert_eq!(config.connection_timeout, Duration::from_secs(45));
        assert_eq!(config.reverse_dial_timeout, Duration::from_secs(15));
    }
}
