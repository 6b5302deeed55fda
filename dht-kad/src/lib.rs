// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! # dht-kad
//!
//! The Kademlia layer: iterative `find_node`/`find_value`/`store` lookups (§4.2, §4.9),
//! the per-peer `find_node` rate limiter, the local value store, and [`Kademlia`] itself,
//! which owns every peer's [`dht_transport::TransportManager`] and drives mesh
//! maintenance on top of a [`dht_routing::RoutingTable`].

pub mod config;
pub mod error;
pub mod kademlia;
pub mod query;
pub mod rate_limit;
pub mod store;

pub use config::KadConfig;
pub use error::{KadError, Result};
pub use kademlia::Kademlia;
pub use query::FindValueOutcome;
pub use rate_limit::{FindNodeRateLimiter, FindNodeRateLimiterGuard};
pub use store::ValueStore;
