// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! A snapshot of a running [`crate::Supervisor`]'s state, the read-only surface the status
//! binary (and any future admin interface) observes a node through.

use dht_bootstrap::LinkState;
use dht_build_info::BuildInfo;
use dht_id::NodeId;
use dht_routing::NodeKind;

/// A point-in-time snapshot of a node's identity, bootstrap link, and routing table size.
///
/// Not `Serialize`: [`LinkState`] carries no wire/file representation of its own, since
/// it is purely an in-process observability signal (§9). The status binary reports this
/// with [`std::fmt::Display`] rather than JSON.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    /// This node's own id.
    pub node_id: NodeId,
    /// What kind of node this process is.
    pub node_kind: NodeKind,
    /// The bootstrap link's current state.
    pub bootstrap_state: LinkState,
    /// Whether `bootstrap_into_mesh` reported this node as the network's first member.
    pub is_genesis: Option<bool>,
    /// How many peers are currently in the routing table.
    pub routing_table_len: usize,
    /// Build/version metadata, for humans comparing two nodes' deployments.
    pub build_info: BuildInfo,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({:?}) — bootstrap: {:?}, peers: {}, protocol {}",
            self.node_id, self.node_kind, self.bootstrap_state, self.routing_table_len,
            self.build_info.protocol_version,
        )
    }
}
