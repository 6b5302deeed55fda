// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Pluggable identity persistence.
//!
//! The core treats identity storage as a capability, not a concrete backend: a server
//! process will want a file on disk, a browser tab will want its own durable key store
//! (IndexedDB or similar). Both are expressed through the same [`IdentityStore`] trait.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use atomic_write_file::AtomicWriteFile;
use tracing::{debug, info};

use crate::{error::Result, Identity, IdentityError, PersistedIdentity};

/// A pluggable capability for loading and persisting a node's [`Identity`].
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load a previously persisted identity, if one exists.
    async fn load(&self) -> Result<Option<Identity>>;

    /// Persist the given identity, overwriting any previous one.
    async fn store(&self, identity: &Identity) -> Result<()>;

    /// Load the existing identity or generate and persist a new one.
    async fn load_or_generate(&self) -> Result<Identity> {
        if let Some(identity) = self.load().await? {
            debug!(node_id = %identity.node_id(), "loaded existing identity");
            Ok(identity)
        } else {
            let identity = Identity::generate();
            info!(node_id = %identity.node_id(), "generated new identity");
            self.store(&identity).await?;
            Ok(identity)
        }
    }
}

/// An [`IdentityStore`] backed by a single JSON file on disk, written atomically.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    /// Store the identity at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store the identity under the platform's standard data directory, in a
    /// `dht-mesh/identity.json` file.
    pub fn in_data_dir() -> Result<Self> {
        let base = dirs_next::data_dir()
            .ok_or_else(|| IdentityError::InvalidKey("no platform data directory".into()))?;
        Ok(Self::new(base.join("dht-mesh").join("identity.json")))
    }

    fn write_sync(path: &Path, identity: &Identity) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let persisted = identity.to_persisted();
        let mut file = AtomicWriteFile::options()
            .open(path)
            .map_err(|e| IdentityError::Io(std::io::Error::other(e)))?;
        let data = serde_json::to_string_pretty(&persisted)?;
        writeln!(file, "{data}")?;
        file.commit()
            .map_err(|e| IdentityError::Io(std::io::Error::other(e)))?;
        Ok(())
    }

    fn read_sync(path: &Path) -> Result<Option<Identity>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let persisted: PersistedIdentity = serde_json::from_str(&contents)?;
        Identity::from_persisted(persisted).map(Some)
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn load(&self) -> Result<Option<Identity>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::read_sync(&path))
            .await
            .map_err(|e| IdentityError::Io(std::io::Error::other(e)))?
    }

    async fn store(&self, identity: &Identity) -> Result<()> {
        let path = self.path.clone();
        let identity = identity.clone();
        tokio::task::spawn_blocking(move || Self::write_sync(&path, &identity))
            .await
            .map_err(|e| IdentityError::Io(std::io::Error::other(e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_or_generate_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("identity.json");

        let store_a = FileIdentityStore::new(&path);
        let identity_a = store_a.load_or_generate().await.expect("generate");

        let store_b = FileIdentityStore::new(&path);
        let identity_b = store_b.load_or_generate().await.expect("load");

        assert_eq!(identity_a.node_id(), identity_b.node_id());
    }

    #[tokio::test]
    async fn load_returns_none_when_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileIdentityStore::new(dir.path().join("missing.json"));
        assert!(store.load().await.expect("load ok").is_none());
    }
}
