// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::backoff::BackoffPlan;

/// Static configuration for a [`crate::BootstrapClient`] (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Bootstrap endpoints to try, in order, on each connect attempt.
    pub endpoints: Vec<Url>,
    /// Advertised protocol version, compared by the server during admission.
    pub protocol_version: String,
    /// Advertised build id, compared by the server during admission.
    pub build_id: String,
    /// Deadline for a single request/response round trip over the bootstrap link.
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// Reconnect backoff shape.
    pub backoff: BackoffPlan,
    /// Give up reconnecting after this many consecutive failed attempts; `0` means
    /// retry forever.
    pub max_reconnect_attempts: u32,
    /// Default `maxPeers` used by callers that don't specify one explicitly.
    pub default_max_peers: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            protocol_version: "1".to_string(),
            build_id: "dev".to_string(),
            request_timeout: Duration::from_secs(10),
            backoff: BackoffPlan {
                base_ms: 10_000,
                ..BackoffPlan::default()
            },
            max_reconnect_attempts: 20,
            default_max_peers: 20,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
