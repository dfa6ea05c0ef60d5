//! # Directory Module
//!
//! Client side of the public-key directory: a remote mapping from
//! participant identifier to published P-256 public key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      KEY DIRECTORY                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   Engine                               Directory                        │
//! │     │                                      │                            │
//! │     │── publish_public_key(owner, pub) ───►│  idempotent upsert        │
//! │     │                                      │                            │
//! │     │── fetch_public_key(peer) ───────────►│                            │
//! │     │◄──────────── Some(65 bytes) ─────────│  published                │
//! │     │◄──────────── None ───────────────────│  → PeerNotEncryptionReady │
//! │     │◄──────────── Err(TransportError) ────│  → propagated unchanged   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backends:
//! - [`MemoryDirectory`] for tests and single-process demos
//! - [`HttpDirectory`] for a REST directory service

mod http;
mod memory;

pub use http::{HttpDirectory, HttpDirectoryConfig};
pub use memory::MemoryDirectory;

use async_trait::async_trait;

use crate::crypto::PeerPublicKey;
use crate::error::{Error, Result};

/// Remote directory of published public keys
#[async_trait]
pub trait PeerKeyDirectory: Send + Sync {
    /// Look up the key published by `peer_id`
    ///
    /// `Ok(None)` means the peer has never published a key. Transport
    /// failures are reported as `Err(TransportError)`.
    async fn fetch_public_key(&self, peer_id: &str) -> Result<Option<Vec<u8>>>;

    /// Publish (upsert) the local identity's public key
    async fn publish_public_key(&self, owner_id: &str, public_key: &[u8]) -> Result<()>;
}

/// A peer public key as fetched from the directory
#[derive(Debug, Clone)]
pub struct PeerPublicKeyRecord {
    /// Whose key this is
    pub peer_id: String,
    /// The validated key
    pub public_key: PeerPublicKey,
    /// Unix timestamp (ms) of the fetch
    pub fetched_at: i64,
}

impl PeerPublicKeyRecord {
    /// Fetch and import `peer_id`'s key
    ///
    /// ## Errors
    ///
    /// - `PeerNotEncryptionReady` if the peer has not published a key
    /// - `KeyImportError` if the published bytes are not a P-256 point
    /// - whatever the directory returned, unchanged
    pub async fn fetch(directory: &dyn PeerKeyDirectory, peer_id: &str) -> Result<Self> {
        let bytes = directory
            .fetch_public_key(peer_id)
            .await?
            .ok_or_else(|| Error::PeerNotEncryptionReady(peer_id.to_string()))?;

        let public_key = PeerPublicKey::from_bytes(&bytes)?;
        tracing::debug!(
            "Fetched public key {} for {}",
            public_key.fingerprint(),
            peer_id
        );

        Ok(Self {
            peer_id: peer_id.to_string(),
            public_key,
            fetched_at: crate::time::now_timestamp_millis(),
        })
    }
}
