// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Errors the [`crate::Supervisor`] can return, layering config and identity failures on
//! top of the lower crates' own error types (§7).

use thiserror::Error;

/// Result type used throughout `dht-node`.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Everything that can go wrong starting or running a [`crate::Supervisor`].
#[derive(Debug, Error)]
pub enum NodeError {
    /// The configuration file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file's contents did not parse as valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// A `DHT_*` environment variable override had a value this config field couldn't
    /// accept.
    #[error("invalid value for environment variable {var}: {value:?}")]
    InvalidEnvOverride { var: &'static str, value: String },

    /// Loading or generating the durable node identity failed.
    #[error(transparent)]
    Identity(#[from] dht_identity::IdentityError),

    /// The bootstrap link rejected a call or failed outright.
    #[error(transparent)]
    Bootstrap(#[from] dht_bootstrap::BootstrapError),

    /// The Kademlia layer rejected a call or failed outright.
    #[error(transparent)]
    Kad(#[from] dht_kad::KadError),
}
