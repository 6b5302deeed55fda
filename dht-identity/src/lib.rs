// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Durable node identity: an ed25519 key pair, its derived [`NodeId`], and a pluggable
//! persistence capability.
//!
//! The private key never leaves this crate's [`Identity`] type. Callers obtain signatures
//! and verification results, never raw key bytes.

pub mod error;
pub mod store;

pub use error::{IdentityError, Result};
pub use store::{FileIdentityStore, IdentityStore};

use chrono::{DateTime, Utc};
use dht_id::NodeId;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// A durable public/private key pair together with its derived [`NodeId`].
///
/// Created on first start (via [`Identity::generate`]) or loaded from durable storage (via
/// an [`IdentityStore`]); mutated only to touch `last_used`; never partially updated.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    node_id: NodeId,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

/// The serializable, on-disk representation of an [`Identity`].
///
/// This is the only place the private key is ever serialized; it never crosses a network
/// boundary.
#[derive(Serialize, Deserialize)]
pub(crate) struct PersistedIdentity {
    /// Hex-encoded ed25519 secret key seed (32 bytes).
    secret_key_hex: String,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

impl Identity {
    /// Generate a fresh identity from a CSPRNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let node_id = NodeId::from_public_key(signing_key.verifying_key().as_bytes());
        let now = Utc::now();
        Self {
            signing_key,
            node_id,
            created_at: now,
            last_used: now,
        }
    }

    /// This node's durable [`NodeId`], derived from the public key.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The public key, serialized for transmission in handshakes and bootstrap `register`
    /// frames.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// When this identity was first created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When this identity was last used to sign something.
    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    /// Sign an arbitrary byte string with the private key.
    ///
    /// Touches `last_used`. The private key itself is never exposed to the caller.
    pub fn sign(&mut self, bytes: &[u8]) -> Signature {
        self.last_used = Utc::now();
        self.signing_key.sign(bytes)
    }

    /// Verify a signature against a detached public key.
    ///
    /// This is a free-standing verification (no access to `self`'s private key needed) so
    /// that any node can verify any other node's signed bootstrap challenge response.
    pub fn verify(public_key_bytes: &[u8; 32], bytes: &[u8], signature: &Signature) -> bool {
        match VerifyingKey::from_bytes(public_key_bytes) {
            Ok(verifying_key) => verifying_key.verify(bytes, signature).is_ok(),
            Err(_) => false,
        }
    }

    pub(crate) fn to_persisted(&self) -> PersistedIdentity {
        PersistedIdentity {
            secret_key_hex: hex::encode(self.signing_key.to_bytes()),
            created_at: self.created_at,
            last_used: self.last_used,
        }
    }

    pub(crate) fn from_persisted(persisted: PersistedIdentity) -> Result<Self> {
        let seed_bytes = hex::decode(&persisted.secret_key_hex)
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        let seed: [u8; 32] = seed_bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidKey("secret key must be 32 bytes".into()))?;
        let signing_key = SigningKey::from_bytes(&seed);
        let node_id = NodeId::from_public_key(signing_key.verifying_key().as_bytes());
        Ok(Self {
            signing_key,
            node_id,
            created_at: persisted.created_at,
            last_used: persisted.last_used,
        })
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("node_id", &self.node_id)
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let mut identity = Identity::generate();
        let public_key = identity.public_key_bytes();
        let signature = identity.sign(b"hello dht");
        assert!(Identity::verify(&public_key, b"hello dht", &signature));
        assert!(!Identity::verify(&public_key, b"tampered", &signature));
    }

    #[test]
    fn node_id_matches_public_key_hash() {
        let identity = Identity::generate();
        let expected = NodeId::from_public_key(&identity.public_key_bytes());
        assert_eq!(identity.node_id(), expected);
    }

    #[test]
    fn persisted_round_trip_preserves_node_id() {
        let identity = Identity::generate();
        let node_id_before = identity.node_id();
        let persisted = identity.to_persisted();
        let restored = Identity::from_persisted(persisted).expect("valid persisted identity");
        assert_eq!(restored.node_id(), node_id_before);
    }
}
