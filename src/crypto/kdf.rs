//! # Key Derivation
//!
//! Turns a raw ECDH shared secret into a 256-bit AES-GCM key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 SHARED SECRET → MESSAGE KEY                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  P-256 ECDH: local_private × peer_public → 32-byte X coordinate        │
//! │                                │                                        │
//! │              ┌─────────────────┴─────────────────┐                     │
//! │              ▼                                   ▼                     │
//! │  ┌───────────────────────────┐   ┌───────────────────────────┐        │
//! │  │  Raw (default)            │   │  Hkdf { info }            │        │
//! │  │                           │   │                           │        │
//! │  │  key = shared_secret      │   │  HKDF-SHA256(             │        │
//! │  │                           │   │    ikm  = shared_secret,  │        │
//! │  │  Interoperates with       │   │    salt = none,           │        │
//! │  │  peers importing the raw  │   │    info = context string  │        │
//! │  │  secret directly.         │   │  )                        │        │
//! │  └───────────────────────────┘   └───────────────────────────┘        │
//! │                                                                         │
//! │  Both peers must use the same variant or every message fails           │
//! │  authentication.                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{KEY_SIZE, SHARED_SECRET_SIZE};
use crate::error::{Error, Result};

/// Domain separation strings for HKDF
pub mod domain {
    /// Default context for message key derivation
    pub const MESSAGE_KEY: &[u8] = b"sealed-dm-message-key-v1";
}

/// How the ECDH output becomes the AEAD key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SharedKeyDerivation {
    /// Use the 256-bit shared secret directly as the AES-256 key
    #[default]
    Raw,
    /// Stretch the shared secret through HKDF-SHA256 with a context string
    Hkdf {
        /// HKDF `info` parameter
        info: Vec<u8>,
    },
}

impl SharedKeyDerivation {
    /// HKDF with the default message-key context
    pub fn hkdf() -> Self {
        Self::Hkdf {
            info: domain::MESSAGE_KEY.to_vec(),
        }
    }

    /// Derive the AEAD key bytes from a shared secret
    pub fn derive(
        &self,
        shared_secret: &[u8; SHARED_SECRET_SIZE],
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        match self {
            Self::Raw => key.copy_from_slice(shared_secret),
            Self::Hkdf { info } => {
                let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
                hkdf.expand(info, &mut key[..])
                    .map_err(|_| Error::KeyImportError("HKDF expansion failed".into()))?;
            }
        }
        Ok(key)
    }
}

// ============================================================================
// TESTS
// ============================================================================
