// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Layered configuration for a [`crate::Supervisor`] (§6): baked-in defaults, optionally
//! overlaid by a TOML file, optionally overlaid again by `DHT_*`-prefixed environment
//! variables. Every field lower than this module's own knobs — `bucket_size`,
//! `concurrency`, transport timeouts, `rtc_ice_servers`, keepalive/maintenance intervals —
//! is reproduced here exactly as enumerated by §6, converted into the concrete
//! `*Config` structs each lower crate already defines.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dht_bootstrap::BootstrapConfig;
use dht_kad::KadConfig;
use dht_routing::{NodeKind, DEFAULT_K};
use dht_transport::{IceServer, TransportConfig};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{NodeError, Result};

/// A single ICE server entry, TOML/env-overridable mirror of [`dht_transport::IceServer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl From<&IceServerConfig> for IceServer {
    fn from(value: &IceServerConfig) -> Self {
        IceServer {
            urls: value.urls.clone(),
            username: value.username.clone(),
            credential: value.credential.clone(),
        }
    }
}

/// Top-level configuration for a single running node.
///
/// `#[serde(default)]` on every field means a TOML file only needs to name the fields it
/// wants to override; everything else falls back to [`NodeConfig::default`] — the "defaults
/// < file" half of the layering. `NodeConfig::load` applies the "< environment" half on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// What kind of node this process is. A `browser` kind only makes sense for the
    /// in-process test harness; a real process is always `server` or `bridge`.
    pub node_kind: NodeKind,
    /// Address the WebSocket listener binds to. Ignored for `browser` nodes.
    pub listen_addr: SocketAddr,
    /// The address other nodes should use to reach this one, if different from
    /// `listen_addr` (behind NAT/a reverse proxy).
    pub public_address: Option<Url>,
    /// Where the durable identity key pair is stored. `None` uses the platform data
    /// directory (`dht-mesh/identity.json`).
    pub identity_path: Option<PathBuf>,
    /// Kademlia bucket capacity, `k`.
    pub bucket_size: usize,
    /// `tracing_subscriber::EnvFilter` directive the status binary installs at startup.
    pub log_filter: String,

    /// Bootstrap link configuration (endpoints, backoff, admission figures).
    pub bootstrap: BootstrapConfig,
    /// Kademlia lookup/maintenance/rate-limit configuration.
    pub kad: KadConfig,

    request_timeout_ms: u64,
    ping_timeout_ms: u64,
    connection_timeout_ms: u64,
    reverse_dial_timeout_ms: u64,
    glare_yield_pause_ms: u64,
    ws_ping_interval_ms: u64,
    keepalive_visible_ms: u64,
    keepalive_hidden_ms: u64,
    keepalive_timeout_ms: u64,
    server_first_frame_timeout_ms: u64,
    ice_gathering_grace_ms: u64,
    max_missed_keepalives: u32,
    ws_max_missed_pings: u32,
    /// ICE servers offered to every WebRTC peer connection (§4.7: STUN plus at least two
    /// TURN relays, one with a TCP:443 fallback).
    pub rtc_ice_servers: Vec<IceServerConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let transport_defaults = TransportConfig::default();
        Self {
            node_kind: NodeKind::Server,
            listen_addr: "0.0.0.0:7700".parse().expect("valid default listen address"),
            public_address: None,
            identity_path: None,
            bucket_size: DEFAULT_K,
            log_filter: "info".to_string(),
            bootstrap: BootstrapConfig::default(),
            kad: KadConfig::default(),
            request_timeout_ms: transport_defaults.request_timeout.as_millis() as u64,
            ping_timeout_ms: transport_defaults.ping_timeout.as_millis() as u64,
            connection_timeout_ms: transport_defaults.connection_timeout.as_millis() as u64,
            reverse_dial_timeout_ms: transport_defaults.reverse_dial_timeout.as_millis() as u64,
            glare_yield_pause_ms: transport_defaults.glare_yield_pause.as_millis() as u64,
            ws_ping_interval_ms: transport_defaults.ws_ping_interval.as_millis() as u64,
            keepalive_visible_ms: transport_defaults.keepalive_visible_interval.as_millis() as u64,
            keepalive_hidden_ms: transport_defaults.keepalive_hidden_interval.as_millis() as u64,
            keepalive_timeout_ms: transport_defaults.keepalive_timeout.as_millis() as u64,
            server_first_frame_timeout_ms: transport_defaults
                .server_first_frame_timeout
                .as_millis() as u64,
            ice_gathering_grace_ms: transport_defaults.ice_gathering_grace.as_millis() as u64,
            max_missed_keepalives: transport_defaults.max_missed_keepalives,
            ws_max_missed_pings: transport_defaults.ws_max_missed_pings,
            rtc_ice_servers: transport_defaults
                .ice_servers
                .iter()
                .map(|s| IceServerConfig {
                    urls: s.urls.clone(),
                    username: s.username.clone(),
                    credential: s.credential.clone(),
                })
                .collect(),
        }
    }
}

impl NodeConfig {
    /// Build the concrete [`TransportConfig`] this node's transport layer runs with.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            reverse_dial_timeout: Duration::from_millis(self.reverse_dial_timeout_ms),
            glare_yield_pause: Duration::from_millis(self.glare_yield_pause_ms),
            ws_ping_interval: Duration::from_millis(self.ws_ping_interval_ms),
            keepalive_visible_interval: Duration::from_millis(self.keepalive_visible_ms),
            keepalive_hidden_interval: Duration::from_millis(self.keepalive_hidden_ms),
            keepalive_timeout: Duration::from_millis(self.keepalive_timeout_ms),
            max_missed_keepalives: self.max_missed_keepalives,
            ws_max_missed_pings: self.ws_max_missed_pings,
            server_first_frame_timeout: Duration::from_millis(self.server_first_frame_timeout_ms),
            ice_gathering_grace: Duration::from_millis(self.ice_gathering_grace_ms),
            ice_servers: self.rtc_ice_servers.iter().map(IceServer::from).collect(),
        }
    }

    /// Load a node's configuration from the layered source: defaults, then an optional
    /// TOML file at `path` if it exists, then `DHT_*` environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| NodeError::ConfigIo {
                        path: path.display().to_string(),
                        source,
                    })?;
                toml::from_str(&contents).map_err(|source| NodeError::ConfigParse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            _ => NodeConfig::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `DHT_*` environment variable overrides on top of whatever defaults/file
    /// contents are already in `self` (§6). Unset variables leave the field untouched.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("DHT_LISTEN_ADDR") {
            self.listen_addr = value
                .parse()
                .map_err(|_| NodeError::InvalidEnvOverride { var: "DHT_LISTEN_ADDR", value })?;
        }
        if let Ok(value) = std::env::var("DHT_PUBLIC_ADDRESS") {
            self.public_address = Some(
                Url::parse(&value)
                    .map_err(|_| NodeError::InvalidEnvOverride { var: "DHT_PUBLIC_ADDRESS", value })?,
            );
        }
        if let Ok(value) = std::env::var("DHT_NODE_KIND") {
            self.node_kind = match value.as_str() {
                "server" => NodeKind::Server,
                "browser" => NodeKind::Browser,
                "bridge" => NodeKind::Bridge,
                _ => return Err(NodeError::InvalidEnvOverride { var: "DHT_NODE_KIND", value }),
            };
        }
        if let Ok(value) = std::env::var("DHT_LOG_FILTER") {
            self.log_filter = value;
        }
        if let Ok(value) = std::env::var("DHT_IDENTITY_PATH") {
            self.identity_path = Some(PathBuf::from(value));
        }
        if let Ok(value) = std::env::var("DHT_BOOTSTRAP_ENDPOINTS") {
            self.bootstrap.endpoints = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Url::parse)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| NodeError::InvalidEnvOverride {
                    var: "DHT_BOOTSTRAP_ENDPOINTS",
                    value,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_lower_crates_own_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.bucket_size, DEFAULT_K);
        assert_eq!(config.transport_config().request_timeout, Duration::from_secs(10));
        assert_eq!(config.node_kind, NodeKind::Server);
    }

    #[test]
    fn load_with_no_file_and_no_env_returns_defaults() {
        let config = NodeConfig::load(None).expect("load defaults");
        assert_eq!(config.listen_addr, NodeConfig::default().listen_addr);
    }

    #[test]
    fn partial_toml_file_only_overrides_named_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dht-node.toml");
        std::fs::write(&path, "log_filter = \"debug\"\nbucket_size = 8\n").expect("write config");

        let config = NodeConfig::load(Some(&path)).expect("load");
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.bucket_size, 8);
        assert_eq!(config.node_kind, NodeKind::Server, "unset fields keep their default");
    }

    #[test]
    fn missing_file_path_falls_back_to_defaults_without_erroring() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("does-not-exist.toml");
        let config = NodeConfig::load(Some(&path)).expect("load falls back to defaults");
        assert_eq!(config.bucket_size, DEFAULT_K);
    }
}
