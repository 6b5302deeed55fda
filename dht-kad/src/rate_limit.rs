// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Per-peer `find_node` rate limiting (§4.9): one in-flight query per peer plus a minimum
//! inter-query spacing; bursts beyond the limit are rejected locally with `rate_limited`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dht_id::NodeId;
use tokio::sync::Mutex;

#[derive(Clone, Copy)]
struct PeerState {
    in_flight: bool,
    last_sent: Option<Instant>,
}

/// Tracks in-flight and last-sent state per peer for `find_node` issuance.
pub struct FindNodeRateLimiter {
    min_spacing: Duration,
    peers: Mutex<HashMap<NodeId, PeerState>>,
}

/// Returned by [`FindNodeRateLimiter::try_acquire`]. Drop the guard (or call
/// [`FindNodeRateLimiterGuard::release`] explicitly) once the query completes so the next
/// one can proceed.
pub struct FindNodeRateLimiterGuard<'a> {
    limiter: &'a FindNodeRateLimiter,
    peer: NodeId,
    released: bool,
}

impl FindNodeRateLimiterGuard<'_> {
    /// Release the in-flight slot, recording the completion time for spacing purposes.
    pub async fn release(mut self) {
        self.release_inner().await;
    }

    async fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut peers = self.limiter.peers.lock().await;
        if let Some(state) = peers.get_mut(&self.peer) {
            state.in_flight = false;
            state.last_sent = Some(Instant::now());
        }
    }
}

impl FindNodeRateLimiter {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to acquire the slot to issue a `find_node` at `peer`. Rejects with `false`
    /// if one is already in flight, or the minimum spacing since the last one hasn't
    /// elapsed yet.
    pub async fn try_acquire(&self, peer: NodeId) -> Option<FindNodeRateLimiterGuard<'_>> {
        let mut peers = self.peers.lock().await;
        let state = peers.entry(peer).or_insert(PeerState {
            in_flight: false,
            last_sent: None,
        });

        if state.in_flight {
            return None;
        }
        if let Some(last_sent) = state.last_sent {
            if last_sent.elapsed() < self.min_spacing {
                return None;
            }
        }
        state.in_flight = true;
        Some(FindNodeRateLimiterGuard {
            limiter: self,
            peer,
            released: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> NodeId {
        NodeId::from_public_key(b"rate-limit-test")
    }

    #[tokio::test]
    async fn second_concurrent_query_is_rejected() {
        let limiter = FindNodeRateLimiter::new(Duration::from_millis(0));
        let guard = limiter.try_acquire(peer()).await;
        assert!(guard.is_some());
        assert!(limiter.try_acquire(peer()).await.is_none());
    }

    #[tokio::test]
    async fn release_allows_a_subsequent_query_after_spacing_elapses() {
        let limiter = FindNodeRateLimiter::new(Duration::from_millis(5));
        let guard = limiter.try_acquire(peer()).await.unwrap();
        guard.release().await;
        assert!(limiter.try_acquire(peer()).await.is_none(), "spacing not yet elapsed");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(limiter.try_acquire(peer()).await.is_some());
    }

    #[tokio::test]
    async fn distinct_peers_do_not_contend() {
        let limiter = FindNodeRateLimiter::new(Duration::from_secs(1));
        let a = NodeId::from_public_key(b"a");
        let b = NodeId::from_public_key(b"b");
        assert!(limiter.try_acquire(a).await.is_some());
        assert!(limiter.try_acquire(b).await.is_some());
    }
}
