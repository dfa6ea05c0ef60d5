//! # Identity Module
//!
//! Lifecycle of the local participant's long-term key pair.
//!
//! ## Identity Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      IDENTITY LIFECYCLE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  First login on a device                                               │
//! │  ┌─────────────┐     ┌──────────────┐     ┌─────────────┐              │
//! │  │ initialize()│ ──► │ export_      │ ──► │ persist()   │              │
//! │  │ new P-256   │     │ public_key() │     │ JWK record  │              │
//! │  │ pair        │     │ 65 bytes     │     │ per owner   │              │
//! │  └─────────────┘     └──────────────┘     └─────────────┘              │
//! │                                                                         │
//! │  Later logins                                                          │
//! │  ┌─────────────┐                                                       │
//! │  │ reload()    │ ──► private scalar from JWK                           │
//! │  │             │ ──► public key recomputed from the scalar             │
//! │  └─────────────┘     (both halves always available)                    │
//! │                                                                         │
//! │  Logout                                                                │
//! │  ┌─────────────┐                                                       │
//! │  │ clear()     │ ──► in-memory pair dropped and zeroized               │
//! │  └─────────────┘                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Persisted Record
//!
//! ```text
//! {
//!   "version": 1,
//!   "createdAt": 1718000000000,
//!   "privateKeyJwk": "{\"kty\":\"EC\",\"crv\":\"P-256\",\"x\":...,\"y\":...,\"d\":...}"
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::IdentityKeyPair;
use crate::error::{Error, Result};
use crate::storage::{keys, InsecureLocalStore};

/// Current persisted record format
pub const IDENTITY_RECORD_VERSION: u8 = 1;

/// Owner of the local identity key pair
///
/// At most one pair is active at a time. `initialize` and `reload` both make
/// their result the active pair.
#[async_trait]
pub trait IdentityKeyStore: Send + Sync {
    /// Generate a fresh key pair and make it active
    ///
    /// Every call produces a new pair; callers must guard against
    /// redundant regeneration.
    fn initialize(&self) -> Result<Arc<IdentityKeyPair>>;

    /// Raw uncompressed public key (65 bytes)
    fn export_public_key(&self, pair: &IdentityKeyPair) -> Vec<u8> {
        pair.public_bytes().to_vec()
    }

    /// Store the private key for `owner_id`, overwriting any prior entry
    async fn persist(&self, pair: &IdentityKeyPair, owner_id: &str) -> Result<()>;

    /// Load and activate the pair persisted for `owner_id`
    ///
    /// Returns `None` when nothing is stored for that owner.
    async fn reload(&self, owner_id: &str) -> Result<Option<Arc<IdentityKeyPair>>>;

    /// The active pair
    ///
    /// ## Errors
    ///
    /// `NotInitialized` if no pair is active.
    fn active(&self) -> Result<Arc<IdentityKeyPair>>;

    /// Discard the active pair
    fn clear(&self);
}

/// On-disk form of an identity
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct PersistedIdentity {
    version: u8,
    created_at: i64,
    private_key_jwk: String,
}

/// Identity store that persists through an [`InsecureLocalStore`]
pub struct LocalIdentityStore {
    storage: Arc<dyn InsecureLocalStore>,
    active: RwLock<Option<Arc<IdentityKeyPair>>>,
}

impl LocalIdentityStore {
    /// Create a store persisting into `storage`
    pub fn new(storage: Arc<dyn InsecureLocalStore>) -> Self {
        Self {
            storage,
            active: RwLock::new(None),
        }
    }

    /// Remove the persisted record for `owner_id`
    pub async fn forget(&self, owner_id: &str) -> Result<bool> {
        let removed = self.storage.delete(&keys::identity(owner_id)).await?;
        if removed {
            tracing::info!("Deleted persisted identity for {}", owner_id);
        }
        Ok(removed)
    }

    fn activate(&self, pair: IdentityKeyPair) -> Arc<IdentityKeyPair> {
        let pair = Arc::new(pair);
        *self.active.write() = Some(pair.clone());
        pair
    }
}

#[async_trait]
impl IdentityKeyStore for LocalIdentityStore {
    fn initialize(&self) -> Result<Arc<IdentityKeyPair>> {
        let pair = IdentityKeyPair::generate()?;
        tracing::info!("Generated identity key {}", pair.fingerprint());
        Ok(self.activate(pair))
    }

    async fn persist(&self, pair: &IdentityKeyPair, owner_id: &str) -> Result<()> {
        let record = PersistedIdentity {
            version: IDENTITY_RECORD_VERSION,
            created_at: pair.created_at(),
            private_key_jwk: pair.to_jwk().to_string(),
        };
        let bytes = Zeroizing::new(serde_json::to_vec(&record)?);

        self.storage.put(&keys::identity(owner_id), &bytes).await?;

        tracing::info!(
            "Persisted identity key {} for {}",
            pair.fingerprint(),
            owner_id
        );
        Ok(())
    }

    async fn reload(&self, owner_id: &str) -> Result<Option<Arc<IdentityKeyPair>>> {
        let bytes = match self.storage.get(&keys::identity(owner_id)).await? {
            Some(bytes) => bytes,
            None => {
                tracing::debug!("No persisted identity for {}", owner_id);
                return Ok(None);
            }
        };

        let record: PersistedIdentity = serde_json::from_slice(&bytes)
            .map_err(|_| Error::StorageError("stored identity record is unreadable".into()))?;

        if record.version != IDENTITY_RECORD_VERSION {
            return Err(Error::StorageError(format!(
                "unsupported identity record version {}",
                record.version
            )));
        }

        let pair = IdentityKeyPair::from_jwk(&record.private_key_jwk, record.created_at)
            .map_err(|_| Error::StorageError("stored private key is invalid".into()))?;

        tracing::info!("Reloaded identity key {} for {}", pair.fingerprint(), owner_id);
        Ok(Some(self.activate(pair)))
    }

    fn active(&self) -> Result<Arc<IdentityKeyPair>> {
        self.active.read().clone().ok_or(Error::NotInitialized)
    }

    fn clear(&self) {
        if let Some(pair) = self.active.write().take() {
            tracing::info!("Cleared identity key {}", pair.fingerprint());
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
