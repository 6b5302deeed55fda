// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Everything that can go wrong talking to a bootstrap endpoint (§4.8, §7).
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A `request`-shaped call did not get a reply before its deadline.
    #[error("bootstrap request timed out: {0}")]
    Timeout(String),

    /// The link closed, normally or otherwise, while a call was outstanding.
    #[error("bootstrap link closed: {0}")]
    Closed(String),

    /// The server rejected this client's protocol or build id (close code `4001`).
    ///
    /// Fatal: the client stops reconnecting this link until the process restarts.
    #[error(
        "bootstrap version mismatch: client {client_version}/{client_build_id}, \
         server {server_version}/{server_build_id}"
    )]
    VersionMismatch {
        client_version: String,
        server_version: String,
        client_build_id: String,
        server_build_id: String,
    },

    /// The challenge/response admission exchange failed.
    #[error("bootstrap authentication failed: {0}")]
    AuthFailed(String),

    /// A frame arrived out of sequence or with unusable contents.
    #[error("bootstrap protocol error: {0}")]
    Protocol(String),

    /// A call was made while no link to a bootstrap endpoint was established.
    #[error("not connected to a bootstrap endpoint")]
    NotConnected,

    /// An internal channel used to hand frames between tasks was closed.
    #[error("bootstrap internal channel closed: {0}")]
    Channel(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BootstrapError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BootstrapError::Channel(err.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for BootstrapError {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        BootstrapError::Channel(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for BootstrapError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        BootstrapError::Timeout("deadline elapsed".to_string())
    }
}
