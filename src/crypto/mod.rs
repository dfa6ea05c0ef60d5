//! # Cryptography Module
//!
//! Every primitive the engine uses: P-256 identity keys, pairwise key
//! derivation, the per-peer shared key cache and the AES-256-GCM codec.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    KEY AGREEMENT                                │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  Alice's Identity (P-256)        Bob's Identity (P-256)        │   │
//! │  │  private a, public A             private b, public B           │   │
//! │  │        │                                  │                     │   │
//! │  │        │   A, B published in the directory│                     │   │
//! │  │        ▼                                  ▼                     │   │
//! │  │  ECDH(a, B)  ════════ equal ════════  ECDH(b, A)               │   │
//! │  │        │                                  │                     │   │
//! │  │        ▼                                  ▼                     │   │
//! │  │  32-byte shared secret (x-coordinate)                          │   │
//! │  │        │                                                        │   │
//! │  │        ├── Raw  ──────────────► AES-256 key                    │   │
//! │  │        └── HKDF-SHA256(info) ─► AES-256 key                    │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 ENCRYPTION SCHEME                               │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  AES-256-GCM                                                   │   │
//! │  │  • 256-bit key (one per peer pair, memoized)                   │   │
//! │  │  • 96-bit IV (random per message)                              │   │
//! │  │  • 128-bit authentication tag                                  │   │
//! │  │  • no associated data                                          │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | P-256 ECDH | Pairwise key agreement |
//! | AES-256-GCM | Message encryption |
//! | HKDF-SHA256 | Optional key hardening |
//! | SHA-256 | Public key fingerprints |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: Private scalars, shared secrets and AEAD keys are
//!    zeroized when dropped
//! 2. **Secure Random**: `rand::rngs::OsRng` for keys and IVs
//! 3. **No IV Reuse**: A fresh random IV for every encryption
//! 4. **Static Secret**: One shared key per peer pair, no ratcheting

pub mod cache;
mod encryption;
mod kdf;
mod keys;

pub use cache::{CacheStats, SharedKeyCacheEntry, SharedSecretCache, SingleFlightCache};
pub use encryption::{Aes256GcmCodec, AeadCodec, EncryptedEnvelope, Iv, SymmetricKey};
pub use kdf::{domain, SharedKeyDerivation};
pub use keys::{fingerprint, IdentityKeyPair, PeerPublicKey};

/// Size of an uncompressed SEC1 P-256 public key (`0x04 ‖ X ‖ Y`)
pub const PUBLIC_KEY_SIZE: usize = 65;

/// Size of the raw ECDH output
pub const SHARED_SECRET_SIZE: usize = 32;

/// Size of the AEAD key (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM IV (96 bits)
pub const IV_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag (128 bits)
pub const TAG_SIZE: usize = 16;

/// Envelope format produced by this version
pub const SCHEME_VERSION: u8 = 1;
