// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! [`Supervisor`]: the component that owns a node's config and identity and wires every
//! other crate in the workspace together into one running process (§2).

use std::collections::HashSet;
use std::sync::Arc;

use dht_bootstrap::BootstrapClient;
use dht_build_info::{build_id, BuildInfo, PROTOCOL_VERSION};
use dht_id::NodeId;
use dht_identity::{FileIdentityStore, Identity, IdentityStore};
use dht_kad::Kademlia;
use dht_routing::{NodeKind, PeerMetadata, RoutingTable};
use dht_transport::{AlwaysVisible, HostEnvironment, TransportFactory, WebSocketListener};
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::status::NodeStatus;

/// Build the closure both [`BootstrapClient`] and [`Kademlia`] poll for this node's own
/// advertised metadata. Cloned once per consumer: every captured value is cheaply `Clone`,
/// so the closure itself is too, and each side always reports the current configuration
/// rather than a snapshot taken at construction time.
fn metadata_provider(config: &NodeConfig) -> impl Fn() -> PeerMetadata + Send + Sync + Clone + 'static {
    let node_kind = config.node_kind;
    let public_address = config.public_address.clone();
    let listen_addr = config.listen_addr;
    let protocol_version = PROTOCOL_VERSION.to_string();
    let build_id = build_id();

    move || {
        let listening_addresses = if node_kind.can_accept_inbound() {
            match Url::parse(&format!("ws://{listen_addr}")) {
                Ok(url) => vec![url],
                Err(err) => {
                    warn!(%err, %listen_addr, "failed to construct local listening address");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let tab_visible = (node_kind == NodeKind::Browser).then_some(true);

        PeerMetadata::new(
            node_kind,
            listening_addresses,
            public_address.clone(),
            HashSet::new(),
            tab_visible,
            protocol_version.clone(),
            build_id.clone(),
        )
        .expect("locally constructed metadata always satisfies its own invariants")
    }
}

/// Wires a durable [`Identity`], a [`RoutingTable`], a [`BootstrapClient`] and a
/// [`Kademlia`] together into one running node (§2).
///
/// `Supervisor` does not itself retry or restart anything: if [`Self::spawn`]'s background
/// tasks end, the process is expected to exit and be restarted by its surrounding
/// supervision (systemd, a container runtime, or — for manual smoke-testing — the status
/// binary's own retry loop), the same separation of concerns the teacher's `antnode`
/// binary draws between `Node::run` and its own outer restart loop.
pub struct Supervisor {
    local_id: NodeId,
    node_kind: NodeKind,
    config: NodeConfig,
    bootstrap: Arc<BootstrapClient>,
    kademlia: Kademlia,
    listener: Option<Arc<WebSocketListener>>,
    is_genesis: tokio::sync::RwLock<Option<bool>>,
}

impl Supervisor {
    /// Construct a `Supervisor` from `config`, loading (or generating and persisting) its
    /// durable identity from `identity_path` (falling back to the platform data directory
    /// if unset).
    #[instrument(skip(config))]
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let identity_store: Box<dyn IdentityStore> = match &config.identity_path {
            Some(path) => Box::new(FileIdentityStore::new(path.clone())),
            None => Box::new(FileIdentityStore::in_data_dir()?),
        };
        let identity = identity_store.load_or_generate().await?;
        Self::with_identity(config, identity)
    }

    /// Construct a `Supervisor` from an already-loaded identity, bypassing
    /// [`dht_identity::IdentityStore`] entirely — used by tests that need several distinct
    /// in-process nodes without touching the filesystem.
    pub fn with_identity(config: NodeConfig, identity: Identity) -> Result<Self> {
        let local_id = identity.node_id();
        let node_kind = config.node_kind;
        info!(%local_id, ?node_kind, "node identity ready");

        let listener = node_kind
            .can_accept_inbound()
            .then(|| WebSocketListener::new(config.listen_addr));

        let host: Arc<dyn HostEnvironment> = Arc::new(AlwaysVisible::default());
        let provide_metadata = metadata_provider(&config);

        let routing_table = RoutingTable::with_bucket_size(local_id, config.bucket_size);
        let factory = TransportFactory::new(
            local_id,
            node_kind,
            config.transport_config(),
            host,
            listener.clone(),
        );
        let bootstrap = Arc::new(BootstrapClient::new(
            local_id,
            identity,
            config.bootstrap.clone(),
            provide_metadata.clone(),
        ));
        let kademlia = Kademlia::new(
            local_id,
            config.kad.clone(),
            routing_table,
            factory,
            bootstrap.clone(),
            provide_metadata,
        );

        Ok(Self {
            local_id,
            node_kind,
            config,
            bootstrap,
            kademlia,
            listener,
            is_genesis: tokio::sync::RwLock::new(None),
        })
    }

    /// This node's own id.
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// The Kademlia layer, for callers that want to issue lookups/stores directly.
    pub fn kademlia(&self) -> &Kademlia {
        &self.kademlia
    }

    /// Start every background task this node needs: the bootstrap reconnect loop, the
    /// Kademlia maintenance loops, and — for a server-capable node — the WebSocket accept
    /// loop. Returns once every task is spawned; does not block for the node's lifetime.
    pub async fn spawn(&self) {
        self.bootstrap.spawn().await;
        self.kademlia.spawn().await;

        if let Some(listener) = &self.listener {
            let listener = listener.clone();
            let acceptor = self.kademlia.inbound_acceptor();
            let first_frame_timeout = self.config.transport_config().server_first_frame_timeout;
            tokio::spawn(async move {
                if let Err(err) = listener.serve(acceptor, first_frame_timeout).await {
                    warn!(%err, "websocket listener stopped");
                }
            });
        }
    }

    /// Ask the bootstrap link for this node's initial peer set (or genesis status) and
    /// seed the routing table with it (§4.8 bullet 2).
    pub async fn bootstrap_into_mesh(&self) -> Result<bool> {
        let max_peers = self.config.bootstrap.default_max_peers;
        Ok(self.kademlia.bootstrap_into_mesh(max_peers).await?)
    }

    /// A snapshot of this node's current identity, bootstrap link state, and routing table
    /// occupancy.
    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.local_id,
            node_kind: self.node_kind,
            bootstrap_state: self.bootstrap.state().await,
            is_genesis: None,
            routing_table_len: self.kademlia.routing_table().len().await,
            build_info: BuildInfo::current(),
        }
    }

    /// Stop reconnecting to the bootstrap endpoint and close the current link, if any.
    /// Does not tear down already-open peer connections; those close on process exit.
    pub async fn shutdown(&self) {
        self.bootstrap.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.listen_addr = "127.0.0.1:0".parse().expect("valid address");
        config
    }

    #[tokio::test]
    async fn with_identity_derives_local_id_from_the_identity() {
        let identity = Identity::generate();
        let expected = identity.node_id();
        let supervisor = Supervisor::with_identity(config(), identity).expect("construct");
        assert_eq!(supervisor.local_id(), expected);
    }

    #[tokio::test]
    async fn status_reports_an_empty_routing_table_before_bootstrap() {
        let supervisor =
            Supervisor::with_identity(config(), Identity::generate()).expect("construct");
        let status = supervisor.status().await;
        assert_eq!(status.routing_table_len, 0);
        assert_eq!(status.node_kind, NodeKind::Server);
    }

    #[tokio::test]
    async fn browser_node_gets_no_websocket_listener() {
        let mut cfg = config();
        cfg.node_kind = NodeKind::Browser;
        let supervisor = Supervisor::with_identity(cfg, Identity::generate()).expect("construct");
        assert!(supervisor.listener.is_none());
    }
}
