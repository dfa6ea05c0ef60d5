//! # Sealed DM
//!
//! End-to-end encryption engine for direct messaging. Each participant holds
//! a long-term P-256 identity key; every pair of participants derives one
//! shared AES-256-GCM key, and messages are sealed before they leave the
//! sender's device.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SEALED DM MODULES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                      ┌──────────────────────┐                           │
//! │                      │     CryptoEngine     │  engine                   │
//! │                      │ ensure_ready / clear │                           │
//! │                      │ encrypt / decrypt    │                           │
//! │                      └──────────┬───────────┘                           │
//! │         ┌───────────────┬───────┴────────┬────────────────┐             │
//! │         ▼               ▼                ▼                ▼             │
//! │  ┌─────────────┐ ┌─────────────┐ ┌──────────────┐ ┌─────────────┐      │
//! │  │  Identity   │ │ SharedSecret│ │  AeadCodec   │ │  Directory  │      │
//! │  │             │ │ Cache       │ │              │ │             │      │
//! │  │ - P-256     │ │ - ECDH      │ │ - AES-GCM    │ │ - fetch     │      │
//! │  │ - persist   │ │ - memoize   │ │ - 12B IV     │ │ - publish   │      │
//! │  │ - reload    │ │ - 1 flight  │ │ - 16B tag    │ │ - HTTP      │      │
//! │  └──────┬──────┘ └─────────────┘ └──────────────┘ └─────────────┘      │
//! │         ▼                                                               │
//! │  ┌─────────────┐                 ┌──────────────┐                       │
//! │  │  Storage    │                 │  Messaging   │  wire payload         │
//! │  │ (insecure)  │                 │  (base64)    │                       │
//! │  └─────────────┘                 └──────────────┘                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`crypto`] - Keys, key derivation, the shared key cache and the codec
//! - [`identity`] - Local identity key lifecycle
//! - [`storage`] - Plaintext local key-value persistence
//! - [`directory`] - Public key directory clients
//! - [`messaging`] - Wire payload encoding
//! - [`engine`] - The [`CryptoEngine`] facade
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sealed_dm::{CryptoEngine, EngineConfig};
//! use sealed_dm::directory::{HttpDirectory, HttpDirectoryConfig};
//! use sealed_dm::storage::FileStore;
//!
//! # async fn run() -> sealed_dm::Result<()> {
//! let directory = Arc::new(HttpDirectory::new(HttpDirectoryConfig::default())?);
//! let storage = Arc::new(FileStore::open("/var/lib/app/keys").await?);
//! let engine = CryptoEngine::with_local_storage(EngineConfig::default(), storage, directory);
//!
//! engine.ensure_ready("alice").await?;
//! let payload = engine.seal_text("hello", "bob").await?;
//! let text = engine.open_text(&payload, "bob").await;
//!
//! engine.clear();
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Model
//!
//! - The private key is stored unencrypted through
//!   [`storage::InsecureLocalStore`]
//! - One static key per peer pair: no forward secrecy, no ratcheting
//! - Logs identify keys by fingerprint only

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod crypto;
pub mod directory;
pub mod engine;
pub mod error;
pub mod identity;
pub mod messaging;
pub mod storage;
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use crypto::{EncryptedEnvelope, IdentityKeyPair, PeerPublicKey};
pub use engine::{CryptoEngine, DecryptFailureReason, DecryptionFailed, EngineConfig, EngineState};
pub use error::{Error, Result};
pub use messaging::{counterparty, MessagePayload, DECRYPTION_FAILED_PLACEHOLDER};

/// Returns the library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        scheme_version: crypto::SCHEME_VERSION,
        target: std::env::consts::OS,
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Envelope format produced by this build
    pub scheme_version: u8,
    /// Target operating system
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================
