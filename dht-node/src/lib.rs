// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! # dht-node
//!
//! [`Supervisor`]: wires a durable [`dht_identity::Identity`], a
//! [`dht_routing::RoutingTable`], a [`dht_bootstrap::BootstrapClient`] and a
//! [`dht_kad::Kademlia`] into one running node process (§2). Owns the node's
//! [`NodeConfig`] and exposes the handful of read-only admin/status queries a caller
//! (or this crate's own status binary) needs to observe a running node from outside.

pub mod config;
pub mod error;
pub mod status;
pub mod supervisor;

pub use config::{IceServerConfig, NodeConfig};
pub use error::{NodeError, Result};
pub use status::NodeStatus;
pub use supervisor::Supervisor;
