// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Compile-time build and protocol version metadata.
//!
//! The wire protocol (handshakes, bootstrap `register` frames) needs a `protocol_version`
//! and a `build_id` on every node. This crate is the single place those values come from,
//! so that every other crate agrees on them without duplicating `env!` calls.

use serde::{Deserialize, Serialize};

/// The DHT wire protocol version this build speaks. Bumped only on wire-incompatible
/// changes to the frame catalogue (§6).
pub const PROTOCOL_VERSION: &str = "1";

/// A short, unique identifier for this build, derived from the git commit it was built
/// from (falling back to the crate version if no git metadata is available).
pub fn build_id() -> String {
    let sha = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown");
    if sha == "unknown" || sha.is_empty() {
        format!("v{}-nogit", env!("CARGO_PKG_VERSION"))
    } else {
        // Ten hex characters is enough to disambiguate builds without bloating every
        // wire frame that carries it.
        let short_sha = &sha[..sha.len().min(10)];
        format!("v{}-{}", env!("CARGO_PKG_VERSION"), short_sha)
    }
}

/// A snapshot of build metadata, suitable for embedding in status/admin output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInfo {
    /// See [`PROTOCOL_VERSION`].
    pub protocol_version: String,
    /// See [`build_id`].
    pub build_id: String,
    /// The crate version this was built from.
    pub crate_version: String,
    /// The git branch this was built from, if known.
    pub git_branch: Option<String>,
    /// UTC timestamp this binary was compiled at, if known.
    pub build_timestamp: Option<String>,
}

impl BuildInfo {
    /// Collect the current build's metadata.
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            build_id: build_id(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            git_branch: option_env!("VERGEN_GIT_BRANCH").map(str::to_string),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP").map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_id_is_never_empty() {
        assert!(!build_id().is_empty());
    }

    #[test]
    fn current_reports_protocol_version() {
        let info = BuildInfo::current();
        assert_eq!(info.protocol_version, PROTOCOL_VERSION);
    }
}
