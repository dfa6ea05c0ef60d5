//! # Shared Key Cache
//!
//! Per-peer memoization of the symmetric key derived from
//! `ECDH(local private, peer public)`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SINGLE-FLIGHT DERIVATION                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  caller 1 ──┐                                                           │
//! │  caller 2 ──┼──► slot(peer) ──► OnceCell ──► fetch + ECDH + import     │
//! │  caller 3 ──┘         │            │           (runs exactly once)     │
//! │                       │            └──────► Arc<SharedKeyCacheEntry>   │
//! │                       │                       shared by all callers     │
//! │                       │                                                 │
//! │  invalidate(peer) ────┴──► slot removed; in-flight callers finish with │
//! │  clear()                   the old result, later callers start fresh   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The slot map lock is only held to look up or remove a slot, never across
//! an `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::{IdentityKeyPair, PeerPublicKey, SharedKeyDerivation, SymmetricKey};
use crate::directory::{PeerKeyDirectory, PeerPublicKeyRecord};
use crate::error::Result;

/// A derived pairwise key
#[derive(Debug)]
pub struct SharedKeyCacheEntry {
    /// Peer this key is shared with
    pub peer_id: String,
    /// AEAD key
    pub key: SymmetricKey,
    /// Peer public key the key was derived from
    pub peer_public_key: PeerPublicKey,
    /// Unix timestamp (ms) of the derivation
    pub derived_at: i64,
}

/// Counters for cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from an existing entry
    pub hits: u64,
    /// ECDH derivations performed
    pub derivations: u64,
    /// Peer key fetches issued to the directory
    pub fetches: u64,
}

/// Memoizes one shared key per peer
#[async_trait]
pub trait SharedSecretCache: Send + Sync {
    /// Key for `peer_id`, deriving it from `peer_public_key` on a miss
    ///
    /// On a hit the supplied bytes are ignored and no primitive is called.
    ///
    /// ## Errors
    ///
    /// `KeyImportError` if `peer_public_key` is not an uncompressed P-256 point.
    async fn get(
        &self,
        peer_id: &str,
        identity: &IdentityKeyPair,
        peer_public_key: &[u8],
    ) -> Result<Arc<SharedKeyCacheEntry>>;

    /// Key for `peer_id`, fetching the peer's public key on a miss
    ///
    /// ## Errors
    ///
    /// - `PeerNotEncryptionReady` if the peer never published a key
    /// - `KeyImportError` if the published key is malformed
    /// - directory errors, unchanged
    async fn get_or_fetch(
        &self,
        peer_id: &str,
        identity: &IdentityKeyPair,
        directory: &dyn PeerKeyDirectory,
    ) -> Result<Arc<SharedKeyCacheEntry>>;

    /// Drop the entry for `peer_id`; returns whether one existed
    fn invalidate(&self, peer_id: &str) -> bool;

    /// Drop every entry
    fn clear(&self);

    /// Number of derived entries
    fn len(&self) -> usize;

    /// Whether no entry has been derived
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Activity counters
    fn stats(&self) -> CacheStats;
}

type Slot = Arc<OnceCell<Arc<SharedKeyCacheEntry>>>;

/// [`SharedSecretCache`] that coalesces concurrent misses per peer
pub struct SingleFlightCache {
    derivation: SharedKeyDerivation,
    slots: Mutex<HashMap<String, Slot>>,
    hits: AtomicU64,
    derivations: AtomicU64,
    fetches: AtomicU64,
}

impl SingleFlightCache {
    /// Create an empty cache using `derivation` to turn ECDH output into keys
    pub fn new(derivation: SharedKeyDerivation) -> Self {
        Self {
            derivation,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            derivations: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    /// The derivation applied to new entries
    pub fn derivation(&self) -> &SharedKeyDerivation {
        &self.derivation
    }

    fn slot(&self, peer_id: &str) -> Slot {
        self.slots
            .lock()
            .entry(peer_id.to_string())
            .or_default()
            .clone()
    }

    /// Remove `slot` if it is still the current slot for `peer_id` and empty
    fn discard_if_empty(&self, peer_id: &str, slot: &Slot) {
        let mut slots = self.slots.lock();
        let stale = slots
            .get(peer_id)
            .map(|current| Arc::ptr_eq(current, slot) && current.get().is_none())
            .unwrap_or(false);
        if stale {
            slots.remove(peer_id);
        }
    }

    async fn resolve<F, Fut>(&self, peer_id: &str, init: F) -> Result<Arc<SharedKeyCacheEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SharedKeyCacheEntry>>,
    {
        let slot = self.slot(peer_id);

        if let Some(entry) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Shared key cache hit for {}", peer_id);
            return Ok(entry.clone());
        }

        let result = slot
            .get_or_try_init(move || async move { init().await.map(Arc::new) })
            .await
            .map(Arc::clone);

        if result.is_err() {
            self.discard_if_empty(peer_id, &slot);
        }
        result
    }

    fn derive(
        &self,
        peer_id: &str,
        identity: &IdentityKeyPair,
        peer_public_key: PeerPublicKey,
    ) -> Result<SharedKeyCacheEntry> {
        let secret = identity.diffie_hellman(&peer_public_key);
        let key = self.derivation.derive(&secret)?;
        self.derivations.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            "Derived shared key for {} (peer key {})",
            peer_id,
            peer_public_key.fingerprint()
        );

        Ok(SharedKeyCacheEntry {
            peer_id: peer_id.to_string(),
            key: SymmetricKey::from_bytes(*key),
            peer_public_key,
            derived_at: crate::time::now_timestamp_millis(),
        })
    }
}

impl Default for SingleFlightCache {
    fn default() -> Self {
        Self::new(SharedKeyDerivation::default())
    }
}

#[async_trait]
impl SharedSecretCache for SingleFlightCache {
    async fn get(
        &self,
        peer_id: &str,
        identity: &IdentityKeyPair,
        peer_public_key: &[u8],
    ) -> Result<Arc<SharedKeyCacheEntry>> {
        self.resolve(peer_id, move || async move {
            let peer_public_key = PeerPublicKey::from_bytes(peer_public_key)?;
            self.derive(peer_id, identity, peer_public_key)
        })
        .await
    }

    async fn get_or_fetch(
        &self,
        peer_id: &str,
        identity: &IdentityKeyPair,
        directory: &dyn PeerKeyDirectory,
    ) -> Result<Arc<SharedKeyCacheEntry>> {
        self.resolve(peer_id, move || async move {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            let record = PeerPublicKeyRecord::fetch(directory, peer_id).await?;
            self.derive(peer_id, identity, record.public_key)
        })
        .await
    }

    fn invalidate(&self, peer_id: &str) -> bool {
        let removed = self
            .slots
            .lock()
            .remove(peer_id)
            .map(|slot| slot.initialized())
            .unwrap_or(false);
        if removed {
            tracing::debug!("Invalidated shared key for {}", peer_id);
        }
        removed
    }

    fn clear(&self) {
        let mut slots = self.slots.lock();
        let count = slots.len();
        slots.clear();
        drop(slots);
        tracing::debug!("Cleared {} shared key slots", count);
    }

    fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            derivations: self.derivations.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
