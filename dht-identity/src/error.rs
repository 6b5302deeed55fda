// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

use thiserror::Error;

/// Result type used throughout `dht-identity`.
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Errors that can occur while loading, storing, or using an [`crate::Identity`].
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The identity store could not read or write its backing file.
    #[error("identity store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted identity could not be deserialized.
    #[error("identity store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The key material on disk did not decode to a valid key pair.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// No identity was found and the store was opened in read-only (no-create) mode.
    #[error("no identity present in store")]
    NotFound,
}
