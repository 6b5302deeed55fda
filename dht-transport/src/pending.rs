// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Correlates outbound request frames with their eventual response, by `requestId`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dht_id::NodeId;
use tokio::sync::{oneshot, RwLock};

use crate::envelope::Envelope;
use crate::error::{DhtError, Result};
use crate::event::RequestId;

struct Pending {
    peer: NodeId,
    sent_at: Instant,
    timeout: Duration,
    responder: oneshot::Sender<Envelope>,
}

/// Tracks in-flight requests awaiting a correlated response.
///
/// One table is shared per [`crate::manager::TransportManager`] instance across every
/// peer it talks to; entries are keyed by `requestId` alone since ids are globally unique.
#[derive(Default)]
pub struct PendingRequests {
    inner: RwLock<HashMap<RequestId, Pending>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outbound request and get back the receiver to await its response.
    pub async fn register(
        &self,
        request_id: RequestId,
        peer: NodeId,
        timeout: Duration,
    ) -> oneshot::Receiver<Envelope> {
        let (responder, receiver) = oneshot::channel();
        let mut inner = self.inner.write().await;
        inner.insert(
            request_id,
            Pending {
                peer,
                sent_at: Instant::now(),
                timeout,
                responder,
            },
        );
        receiver
    }

    /// Resolve a pending request with its response, if the request id is known and the
    /// response came from the peer the request was sent to. Returns `true` if a match
    /// was found and delivered.
    pub async fn resolve(&self, request_id: &RequestId, from: NodeId, envelope: Envelope) -> bool {
        let pending = {
            let mut inner = self.inner.write().await;
            inner.remove(request_id)
        };
        match pending {
            Some(pending) if pending.peer == from => pending.responder.send(envelope).is_ok(),
            Some(pending) => {
                tracing::warn!(
                    expected = %pending.peer,
                    got = %from,
                    request_id = %request_id,
                    "response arrived from a peer that did not originate the request"
                );
                false
            }
            None => false,
        }
    }

    /// Cancel every pending request addressed to `peer`, e.g. on disconnect. The waiting
    /// callers observe this as [`DhtError::Closed`].
    pub async fn fail_peer(&self, peer: NodeId) {
        let mut inner = self.inner.write().await;
        inner.retain(|_, pending| pending.peer != peer);
    }

    /// Drop (and thereby fail) every request that has outlived its timeout. Callers await
    /// responses via `tokio::time::timeout` themselves, so this is a backstop that keeps
    /// the table from growing unbounded when a response never arrives and the waiter was
    /// already dropped.
    pub async fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let before = inner.len();
        inner.retain(|_, pending| now.duration_since(pending.sent_at) <= pending.timeout);
        before - inner.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Await a response with a hard deadline, translating a dropped channel or elapsed timer
/// into the appropriate [`DhtError`].
pub async fn await_response(
    receiver: oneshot::Receiver<Envelope>,
    timeout: Duration,
) -> Result<Envelope> {
    match tokio::time::timeout(timeout, receiver).await {
        Ok(Ok(envelope)) => Ok(envelope),
        Ok(Err(_)) => Err(DhtError::Closed(
            "connection closed while awaiting response".to_string(),
        )),
        Err(_) => Err(DhtError::Timeout("no response received".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::FramePayload;

    fn peer(seed: &[u8]) -> NodeId {
        NodeId::from_public_key(seed)
    }

    #[tokio::test]
    async fn resolve_delivers_response_to_matching_request() {
        let table = PendingRequests::new();
        let from = peer(b"responder");
        let request_id = RequestId::new();
        let receiver = table
            .register(request_id.clone(), from, Duration::from_secs(5))
            .await;

        let envelope = Envelope::new(from, FramePayload::Pong { original_timestamp: 1 });
        assert!(table.resolve(&request_id, from, envelope).await);
        let received = await_response(receiver, Duration::from_secs(1)).await.unwrap();
        assert!(matches!(received.payload, FramePayload::Pong { .. }));
    }

    #[tokio::test]
    async fn resolve_rejects_response_from_wrong_peer() {
        let table = PendingRequests::new();
        let expected = peer(b"expected");
        let impostor = peer(b"impostor");
        let request_id = RequestId::new();
        let _receiver = table
            .register(request_id.clone(), expected, Duration::from_secs(5))
            .await;

        let envelope = Envelope::new(impostor, FramePayload::Ping);
        assert!(!table.resolve(&request_id, impostor, envelope).await);
        assert_eq!(table.len().await, 0, "unmatched request is still removed");
    }

    #[tokio::test]
    async fn await_response_times_out_without_a_reply() {
        let table = PendingRequests::new();
        let from = peer(b"silent");
        let receiver = table
            .register(RequestId::new(), from, Duration::from_millis(20))
            .await;

        let result = await_response(receiver, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(DhtError::Timeout(_))));
    }

    #[tokio::test]
    async fn fail_peer_drops_only_that_peers_requests() {
        let table = PendingRequests::new();
        let a = peer(b"a");
        let b = peer(b"b");
        table.register(RequestId::new(), a, Duration::from_secs(5)).await;
        table.register(RequestId::new(), b, Duration::from_secs(5)).await;

        table.fail_peer(a).await;
        assert_eq!(table.len().await, 1);
    }
}
