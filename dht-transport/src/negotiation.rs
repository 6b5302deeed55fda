// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Perfect-negotiation glare resolution (§4.5).
//!
//! `PoliteYielded` is a success status, not an error: the polite side ends up with a
//! working `Open` connection either way, just not necessarily the one it dialed.

use std::time::Duration;

use dht_id::NodeId;

use crate::connection::{BeginOutcome, ConnectionRegistry};

/// The default pause a polite peer waits for an inbound attempt before resuming its own.
pub const DEFAULT_GLARE_YIELD_PAUSE: Duration = Duration::from_millis(500);

/// Which side a peer plays in a simultaneous-open race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Politeness {
    /// Yields to the other side's attempt.
    Polite,
    /// Keeps its own attempt and ignores the other side's.
    Impolite,
}

/// A peer is polite iff its id sorts before the remote id (§4.5).
pub fn politeness(local: NodeId, remote: NodeId) -> Politeness {
    if local < remote {
        Politeness::Polite
    } else {
        Politeness::Impolite
    }
}

/// The result of attempting to open a connection when one may already be in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// No contention; dial as normal.
    Proceed,
    /// Already `Open`; the new attempt is rejected as a duplicate.
    AlreadyOpen,
    /// This side yielded its own attempt and adopted the peer's inbound connection
    /// instead. Not an error.
    PoliteYielded,
    /// This side is impolite and keeps its in-flight attempt; the new request is dropped.
    KeepAttempt,
}

/// Resolve contention for the connection slot to `peer`, per the perfect-negotiation
/// rule. `yield_pause` is exposed for tests; production callers use
/// [`DEFAULT_GLARE_YIELD_PAUSE`].
pub async fn resolve_glare(
    registry: &ConnectionRegistry,
    local: NodeId,
    peer: NodeId,
    yield_pause: Duration,
) -> NegotiationOutcome {
    match registry.begin().await {
        BeginOutcome::Fresh => return NegotiationOutcome::Proceed,
        BeginOutcome::AlreadyOpen => return NegotiationOutcome::AlreadyOpen,
        BeginOutcome::Contend => {}
    }

    match politeness(local, peer) {
        Politeness::Impolite => NegotiationOutcome::KeepAttempt,
        Politeness::Polite => {
            registry.clear_in_flight().await;
            tokio::time::sleep(yield_pause).await;
            match registry.begin().await {
                // Nothing arrived during the pause: resume our own attempt.
                BeginOutcome::Fresh => NegotiationOutcome::Proceed,
                // The peer's inbound attempt occupied the slot while we waited.
                _ => NegotiationOutcome::PoliteYielded,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use crate::types::{ConnectionDirection, TransportKind};
    use tokio::sync::{mpsc, oneshot};

    fn lower() -> NodeId {
        NodeId::from_bytes([0u8; 20])
    }

    fn higher() -> NodeId {
        NodeId::from_bytes([0xffu8; 20])
    }

    fn in_flight_handle(peer: NodeId) -> ConnectionHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        ConnectionHandle::new(peer, ConnectionDirection::Outbound, TransportKind::WebSocket, tx, shutdown_tx)
    }

    #[test]
    fn lower_id_is_polite() {
        assert_eq!(politeness(lower(), higher()), Politeness::Polite);
        assert_eq!(politeness(higher(), lower()), Politeness::Impolite);
    }

    #[tokio::test]
    async fn no_contention_proceeds() {
        let registry = ConnectionRegistry::new();
        let outcome = resolve_glare(&registry, lower(), higher(), Duration::from_millis(10)).await;
        assert_eq!(outcome, NegotiationOutcome::Proceed);
    }

    #[tokio::test]
    async fn impolite_side_keeps_its_attempt() {
        let registry = ConnectionRegistry::new();
        registry.install(in_flight_handle(lower())).await;
        // local = higher (impolite relative to lower peer)
        let outcome = resolve_glare(&registry, higher(), lower(), Duration::from_millis(10)).await;
        assert_eq!(outcome, NegotiationOutcome::KeepAttempt);
    }

    #[tokio::test]
    async fn polite_side_resumes_when_nothing_arrives() {
        let registry = ConnectionRegistry::new();
        registry.install(in_flight_handle(higher())).await;
        // local = lower (polite relative to higher peer)
        let outcome = resolve_glare(&registry, lower(), higher(), Duration::from_millis(5)).await;
        assert_eq!(outcome, NegotiationOutcome::Proceed);
    }

    #[tokio::test]
    async fn polite_side_yields_when_inbound_arrives_during_pause() {
        let registry = ConnectionRegistry::new();
        registry.install(in_flight_handle(higher())).await;

        let registry_ref = &registry;
        let resolved = tokio::join!(
            resolve_glare(registry_ref, lower(), higher(), Duration::from_millis(50)),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let mut handle = in_flight_handle(higher());
                handle.set_state(crate::types::ConnectionState::Open);
                registry_ref.install(handle).await;
            }
        );
        assert_eq!(resolved.0, NegotiationOutcome::PoliteYielded);
    }
}
