// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Tracks the single connection a [`crate::manager::TransportManager`] may own to its
//! peer, enforcing the at-most-one-`Open`-connection invariant (§3 data model).

use std::time::Instant;

use dht_id::NodeId;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::envelope::Envelope;
use crate::types::{ConnectionDirection, ConnectionState, TransportKind};

/// A handle to the in-flight or established connection to a peer.
pub struct ConnectionHandle {
    pub peer: NodeId,
    pub direction: ConnectionDirection,
    pub transport: TransportKind,
    pub state: ConnectionState,
    pub opened_at: Instant,
    pub last_activity_at: Instant,
    /// Outbound frame queue consumed by the transport-specific write task.
    pub outbound: mpsc::UnboundedSender<Envelope>,
    /// Signaled once to ask the transport-specific task to shut down.
    shutdown: Option<oneshot::Sender<()>>,
}

impl ConnectionHandle {
    pub fn new(
        peer: NodeId,
        direction: ConnectionDirection,
        transport: TransportKind,
        outbound: mpsc::UnboundedSender<Envelope>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        let now = Instant::now();
        Self {
            peer,
            direction,
            transport,
            state: ConnectionState::Connecting,
            opened_at: now,
            last_activity_at: now,
            outbound,
            shutdown: Some(shutdown),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Instant::now();
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.touch();
    }

    /// Request the owning transport task to tear the connection down. A no-op if it was
    /// already requested.
    pub fn request_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Holds at most one [`ConnectionHandle`] per peer for a single `TransportManager`
/// instance (one peer per manager in this design, but the registry stays general so a
/// future multi-peer manager can reuse it without reshaping the type).
#[derive(Default)]
pub struct ConnectionRegistry {
    slot: RwLock<Option<ConnectionHandle>>,
}

/// Returned by [`ConnectionRegistry::begin`] describing how a new `open` attempt must
/// proceed given any existing connection.
pub enum BeginOutcome {
    /// No connection exists; proceed with a normal dial.
    Fresh,
    /// Already `Open` to this peer; reject the new attempt.
    AlreadyOpen,
    /// An attempt is in flight; the caller must run glare resolution (§4.5).
    Contend,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide how a call to `open` should proceed given the current slot state.
    pub async fn begin(&self) -> BeginOutcome {
        match self.slot.read().await.as_ref() {
            None => BeginOutcome::Fresh,
            Some(handle) if handle.state.is_open() => BeginOutcome::AlreadyOpen,
            Some(handle) if handle.state.is_in_flight() => BeginOutcome::Contend,
            Some(_) => BeginOutcome::Fresh,
        }
    }

    /// Install a new handle, replacing whatever was there (used after `begin` returned
    /// `Fresh`, or after the polite side yielded and cleared its own attempt).
    pub async fn install(&self, handle: ConnectionHandle) {
        let mut slot = self.slot.write().await;
        if let Some(mut existing) = slot.take() {
            existing.request_shutdown();
        }
        *slot = Some(handle);
    }

    /// Tear down and clear whatever attempt is in flight, without installing a new one.
    /// Used by the polite side of glare resolution.
    pub async fn clear_in_flight(&self) {
        let mut slot = self.slot.write().await;
        if matches!(slot.as_ref().map(|h| &h.state), Some(s) if s.is_in_flight()) {
            if let Some(mut existing) = slot.take() {
                existing.request_shutdown();
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        matches!(self.slot.read().await.as_ref(), Some(h) if h.state.is_open())
    }

    pub async fn state(&self) -> Option<ConnectionState> {
        self.slot.read().await.as_ref().map(|h| h.state.clone())
    }

    pub async fn set_state(&self, state: ConnectionState) {
        if let Some(handle) = self.slot.write().await.as_mut() {
            handle.set_state(state);
        }
    }

    pub async fn touch(&self) {
        if let Some(handle) = self.slot.write().await.as_mut() {
            handle.touch();
        }
    }

    /// Send a frame through the active connection's outbound queue.
    pub async fn send(&self, envelope: Envelope) -> Result<(), Envelope> {
        let slot = self.slot.read().await;
        match slot.as_ref() {
            Some(handle) => handle.outbound.send(envelope).map_err(|e| e.0),
            None => Err(envelope),
        }
    }

    /// Close and clear whatever connection currently occupies the slot.
    pub async fn close(&self) {
        let mut slot = self.slot.write().await;
        if let Some(mut handle) = slot.take() {
            handle.set_state(ConnectionState::Closing);
            handle.request_shutdown();
        }
    }

    pub async fn transport_kind(&self) -> Option<TransportKind> {
        self.slot.read().await.as_ref().map(|h| h.transport)
    }

    pub async fn direction(&self) -> Option<ConnectionDirection> {
        self.slot.read().await.as_ref().map(|h| h.direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> NodeId {
        NodeId::from_public_key(b"connection-test")
    }

    async fn fresh_handle(direction: ConnectionDirection) -> ConnectionHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        ConnectionHandle::new(peer(), direction, TransportKind::WebSocket, tx, shutdown_tx)
    }

    #[tokio::test]
    async fn begin_reports_fresh_when_empty() {
        let registry = ConnectionRegistry::new();
        assert!(matches!(registry.begin().await, BeginOutcome::Fresh));
    }

    #[tokio::test]
    async fn begin_reports_already_open() {
        let registry = ConnectionRegistry::new();
        let mut handle = fresh_handle(ConnectionDirection::Outbound).await;
        handle.set_state(ConnectionState::Open);
        registry.install(handle).await;
        assert!(matches!(registry.begin().await, BeginOutcome::AlreadyOpen));
    }

    #[tokio::test]
    async fn begin_reports_contend_while_in_flight() {
        let registry = ConnectionRegistry::new();
        registry.install(fresh_handle(ConnectionDirection::Outbound).await).await;
        assert!(matches!(registry.begin().await, BeginOutcome::Contend));
    }

    #[tokio::test]
    async fn clear_in_flight_empties_the_slot() {
        let registry = ConnectionRegistry::new();
        registry.install(fresh_handle(ConnectionDirection::Outbound).await).await;
        registry.clear_in_flight().await;
        assert!(matches!(registry.begin().await, BeginOutcome::Fresh));
    }

    #[tokio::test]
    async fn install_replaces_and_shuts_down_previous_handle() {
        let registry = ConnectionRegistry::new();
        registry.install(fresh_handle(ConnectionDirection::Outbound).await).await;
        registry.install(fresh_handle(ConnectionDirection::Inbound).await).await;
        assert_eq!(registry.direction().await, Some(ConnectionDirection::Inbound));
    }
}
