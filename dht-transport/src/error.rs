// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Error types for `dht-transport`, covering the full error-kind taxonomy from §7.

use thiserror::Error;

/// Result type used throughout `dht-transport`.
pub type Result<T> = std::result::Result<T, DhtError>;

/// Errors a [`crate::manager::TransportManager`] or the connection layer can return.
#[derive(Debug, Error)]
pub enum DhtError {
    /// An operation's deadline elapsed before it completed.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The connection was closed, locally or by the peer.
    #[error("connection closed: {0}")]
    Closed(String),

    /// The handshake frame exchange did not complete successfully.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An operation was attempted on a manager that has no open connection.
    #[error("connection is not open")]
    NotOpen,

    /// The manager has been shut down and can no longer be used.
    #[error("transport manager destroyed")]
    Destroyed,

    /// A peer's connection limit has been reached.
    #[error("maximum connections reached: {0}")]
    MaxConnections(String),

    /// No address was reachable for the given peer.
    #[error("no reachable address for peer")]
    NoReachableAddress,

    /// A server could not complete an outbound connection to a browser peer because the
    /// browser never dialed back within the deadline.
    #[error("browser peer did not dial back in time")]
    NoReverseDial,

    /// The peer speaks an incompatible protocol version.
    #[error("protocol version mismatch: {0}")]
    VersionMismatch(String),

    /// Bootstrap authentication failed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// An operation was rejected locally due to rate limiting.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// An operation was rejected because it duplicates an existing one.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A lower-level transport error (I/O, TLS handshake, WebRTC negotiation, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// A malformed or unparseable wire frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal channel communication error (a background task's receiver/sender was
    /// dropped unexpectedly).
    #[error("channel error: {0}")]
    Channel(String),

    /// JSON (de)serialization error on a wire frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio::sync::oneshot::error::RecvError> for DhtError {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        DhtError::Channel(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DhtError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        DhtError::Channel(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for DhtError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DhtError::Timeout("deadline elapsed".to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DhtError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        DhtError::Transport(err.to_string())
    }
}

impl From<webrtc::Error> for DhtError {
    fn from(err: webrtc::Error) -> Self {
        DhtError::Transport(err.to_string())
    }
}
