// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Tunables for the iterative lookup, maintenance and rate-limiting behaviour of
//! [`crate::Kademlia`] (§4.9).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the Kademlia layer. Bucket capacity (`k`) lives on the
/// [`dht_routing::RoutingTable`] this layer is built on top of, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KadConfig {
    /// The number of concurrent in-flight queries per iterative lookup, α.
    pub concurrency: usize,
    /// Deadline for a single `find_node`/`find_value`/`store` round-trip.
    pub query_timeout: Duration,
    /// Deadline for a single `ping` round-trip.
    pub ping_timeout: Duration,
    /// Number of attempts (including the first) before a query target is given up on.
    pub max_attempts: u32,
    /// Base delay between retries of the same query, before jitter.
    pub retry_base_delay: Duration,
    /// How often bucket-refresh maintenance runs.
    pub bucket_refresh_interval: Duration,
    /// How often stale-request pruning and `last_seen` touch-up runs.
    pub sweep_interval: Duration,
    /// Minimum spacing between successive `find_node` calls issued at the same peer.
    pub find_node_min_spacing: Duration,
}

impl Default for KadConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            query_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(250),
            bucket_refresh_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
            find_node_min_spacing: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_figures() {
        let config = KadConfig::default();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.bucket_refresh_interval, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
    }
}
