//! # Encryption Module
//!
//! AES-256-GCM authenticated encryption into a fixed envelope.
//!
//! ## Envelope Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ENCRYPTED ENVELOPE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  AES-256-GCM(key, iv, plaintext, aad = ∅)                              │
//! │           ↓                                                             │
//! │  ciphertext ‖ tag            (primitive's combined output)             │
//! │           ↓ split                                                       │
//! │  ┌──────────────────┬──────────┬──────────┬────────────────┐           │
//! │  │ ciphertext       │ iv       │ tag      │ scheme_version │           │
//! │  │ len(plaintext)   │ 12 bytes │ 16 bytes │ 1              │           │
//! │  └──────────────────┴──────────┴──────────┴────────────────┘           │
//! │                                                                         │
//! │  Decryption reassembles ciphertext ‖ tag before calling the primitive. │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Confidentiality | Only holders of the pairwise key can read the message |
//! | Integrity | Any modification fails tag verification |
//! | IV uniqueness | Fresh 96-bit random IV per call, never a counter |
//! | Failure opacity | Wrong key and corrupted data produce the same error |

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use super::{IV_SIZE, KEY_SIZE, SCHEME_VERSION, TAG_SIZE};
use crate::error::{Error, Result};

/// A 96-bit initialization vector for AES-GCM
///
/// ## Critical Security Requirement
///
/// **NEVER reuse an IV with the same key!**
///
/// IV reuse under AES-GCM leaks the XOR of the plaintexts and lets an
/// attacker recover the authentication key and forge messages. Random IVs
/// are safe for up to 2^32 messages per key (birthday bound for 96 bits).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Iv(pub [u8; IV_SIZE]);

impl Iv {
    /// Generate a cryptographically random IV
    ///
    /// ## Errors
    ///
    /// `KeyGenerationError` if the operating system's random source fails.
    pub fn random() -> Result<Self> {
        Self::from_rng(&mut rand::rngs::OsRng)
    }

    fn from_rng<R: RngCore>(rng: &mut R) -> Result<Self> {
        let mut bytes = [0u8; IV_SIZE];
        rng.try_fill_bytes(&mut bytes).map_err(|e| {
            Error::KeyGenerationError(format!("secure random source unavailable: {}", e))
        })?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }
}

/// A 256-bit AES-GCM key shared by one pair of participants
///
/// Zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// One encrypted message
///
/// Immutable once produced and carries no key material, so it is safe to
/// transmit and persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    ciphertext: Vec<u8>,
    iv: [u8; IV_SIZE],
    tag: [u8; TAG_SIZE],
    scheme_version: u8,
}

impl EncryptedEnvelope {
    /// Assemble an envelope from its wire fields
    ///
    /// ## Errors
    ///
    /// `MalformedEnvelope` if the IV is not 12 bytes or the tag is not 16.
    pub fn from_parts(
        ciphertext: Vec<u8>,
        iv: &[u8],
        tag: &[u8],
        scheme_version: u8,
    ) -> Result<Self> {
        let iv: [u8; IV_SIZE] = iv.try_into().map_err(|_| {
            Error::MalformedEnvelope(format!("iv must be {} bytes, got {}", IV_SIZE, iv.len()))
        })?;
        let tag: [u8; TAG_SIZE] = tag.try_into().map_err(|_| {
            Error::MalformedEnvelope(format!(
                "auth tag must be {} bytes, got {}",
                TAG_SIZE,
                tag.len()
            ))
        })?;

        Ok(Self {
            ciphertext,
            iv,
            tag,
            scheme_version,
        })
    }

    /// Ciphertext without the tag
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// The 12-byte IV
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// The 16-byte authentication tag
    pub fn tag(&self) -> &[u8; TAG_SIZE] {
        &self.tag
    }

    /// Format identifier
    pub fn scheme_version(&self) -> u8 {
        self.scheme_version
    }

    /// Recompose the primitive's `ciphertext ‖ tag` buffer
    fn combined(&self) -> Vec<u8> {
        let mut combined = Vec::with_capacity(self.ciphertext.len() + TAG_SIZE);
        combined.extend_from_slice(&self.ciphertext);
        combined.extend_from_slice(&self.tag);
        combined
    }
}

/// Authenticated encryption of message payloads
pub trait AeadCodec: Send + Sync {
    /// Encrypt `plaintext` under `key` with a fresh random IV
    fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<EncryptedEnvelope>;

    /// Verify and decrypt an envelope
    ///
    /// ## Errors
    ///
    /// - `MalformedEnvelope` for an unknown scheme version
    /// - `AuthenticationFailure` for a wrong key, corrupted ciphertext or
    ///   corrupted tag, all reported identically
    fn decrypt(&self, envelope: &EncryptedEnvelope, key: &SymmetricKey) -> Result<Vec<u8>>;
}

/// AES-256-GCM with a 128-bit tag and no associated data
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256GcmCodec;

impl AeadCodec for Aes256GcmCodec {
    fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<EncryptedEnvelope> {
        let iv = Iv::random()?;

        let mut combined = key
            .cipher()
            .encrypt(AesNonce::from_slice(iv.as_bytes()), plaintext)
            .map_err(|_| Error::MalformedEnvelope("plaintext exceeds AES-GCM limits".into()))?;

        let tag_start = combined.len() - TAG_SIZE;
        let tag = combined.split_off(tag_start);

        EncryptedEnvelope::from_parts(combined, iv.as_bytes(), &tag, SCHEME_VERSION)
    }

    fn decrypt(&self, envelope: &EncryptedEnvelope, key: &SymmetricKey) -> Result<Vec<u8>> {
        if envelope.scheme_version != SCHEME_VERSION {
            return Err(Error::MalformedEnvelope(format!(
                "unsupported scheme version {} (expected {})",
                envelope.scheme_version, SCHEME_VERSION
            )));
        }

        let combined = envelope.combined();
        key.cipher()
            .decrypt(AesNonce::from_slice(&envelope.iv), combined.as_slice())
            .map_err(|_| Error::AuthenticationFailure)
    }
}

// ============================================================================
// TESTS
// ============================================================================
