// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! The local value store backing `store`/`find_value` (§4.9).
//!
//! This is intentionally a flat in-memory map: the spec's Non-goals exclude replicated
//! storage semantics beyond Kademlia's standard primitives, so there is no expiry,
//! republishing, or size-bounding layer here — just what `store`/`find_value` need to
//! answer requests addressed to this node as one of the `k` closest to a key.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// The local node's share of the DHT's key/value space.
#[derive(Default)]
pub struct ValueStore {
    values: RwLock<HashMap<String, String>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value for `key`, overwriting any previous value.
    pub async fn put(&self, key: String, value: String) {
        self.values.write().await.insert(key, value);
    }

    /// Look up a value by key.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.values.read().await.get(key).cloned()
    }

    /// The number of keys currently held.
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = ValueStore::new();
        store.put("key".to_string(), "value".to_string()).await;
        assert_eq!(store.get("key").await, Some("value".to_string()));
    }

    #[tokio::test]
    async fn unknown_key_returns_none() {
        let store = ValueStore::new();
        assert_eq!(store.get("missing").await, None);
    }

    #[tokio::test]
    async fn put_overwrites_previous_value() {
        let store = ValueStore::new();
        store.put("key".to_string(), "first".to_string()).await;
        store.put("key".to_string(), "second".to_string()).await;
        assert_eq!(store.get("key").await, Some("second".to_string()));
    }
}
