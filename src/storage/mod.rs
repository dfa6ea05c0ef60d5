//! # Storage Module
//!
//! Local persistence for the identity private key.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  InsecureLocalStore Trait                                       │   │
//! │  │  ────────────────────────                                        │   │
//! │  │                                                                 │   │
//! │  │  • get(key)          - Read opaque bytes                       │   │
//! │  │  • put(key, value)   - Write, overwriting any previous value   │   │
//! │  │  • delete(key)       - Remove                                  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌───────────────┐  ┌───────────────┐                                  │
//! │  │  MemoryStore  │  │   FileStore   │                                  │
//! │  │               │  │               │                                  │
//! │  │ - HashMap     │  │ - One file    │                                  │
//! │  │ - Tests and   │  │   per key     │                                  │
//! │  │   ephemeral   │  │ - 0600 on     │                                  │
//! │  │   sessions    │  │   Unix        │                                  │
//! │  └───────────────┘  └───────────────┘                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! Values are stored **in plaintext**. The trait name says so on purpose:
//! a passphrase-wrapped or keychain-backed implementation can replace these
//! without any change to the identity store or the engine.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::Result;

/// Key names for local storage
pub mod keys {
    /// Prefix for persisted identity records, followed by the owner id
    pub const IDENTITY_PREFIX: &str = "sealed-dm.identity.";

    /// Storage key for an owner's identity record
    pub fn identity(owner_id: &str) -> String {
        format!("{}{}", IDENTITY_PREFIX, owner_id)
    }
}

/// Key-value byte store with no protection at rest
#[async_trait]
pub trait InsecureLocalStore: Send + Sync {
    /// Read the value stored under `key`, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove `key`; returns whether anything was removed
    async fn delete(&self, key: &str) -> Result<bool>;
}
