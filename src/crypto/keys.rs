//! # Key Management
//!
//! Identity key pairs and peer public keys on NIST P-256.
//!
//! ## Key Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY TYPES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  IdentityKeyPair (P-256, ECDH only)                             │   │
//! │  │  ─────────────────────────────────                               │   │
//! │  │                                                                  │   │
//! │  │  Purpose:                                                       │   │
//! │  │  • Key agreement with peers (ECDH)                              │   │
//! │  │  • Never used for signing                                       │   │
//! │  │                                                                  │   │
//! │  │  Format:                                                        │   │
//! │  │  • Private key: 32-byte scalar (zeroized on drop)              │   │
//! │  │  • Public key: 65 bytes, SEC1 uncompressed (0x04 || X || Y)    │   │
//! │  │  • Export: JWK (RFC 7517) for local persistence                │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  PeerPublicKey                                                  │   │
//! │  │  ─────────────                                                   │   │
//! │  │                                                                  │   │
//! │  │  A validated point on P-256 imported from the 65 raw bytes     │   │
//! │  │  published in the key directory.                                │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use p256::{
    ecdh::diffie_hellman,
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey as P256PublicKey, SecretKey,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use super::{PUBLIC_KEY_SIZE, SHARED_SECRET_SIZE};
use crate::error::{Error, Result};

/// SEC1 tag byte for an uncompressed point
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// Number of hash bytes shown in a key fingerprint
const FINGERPRINT_BYTES: usize = 8;

/// The local participant's long-term P-256 key pair
///
/// ## Security
///
/// - The private scalar is zeroized when this struct is dropped
/// - `Debug` output shows only the public fingerprint
/// - Both halves are always present: there is no way to build a pair
///   without its public key
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)] // p256::SecretKey zeroizes itself
    secret: SecretKey,
    #[zeroize(skip)]
    public: P256PublicKey,
    public_bytes: [u8; PUBLIC_KEY_SIZE],
    created_at: i64,
}

impl IdentityKeyPair {
    /// Generate a fresh key pair from the operating system's CSPRNG
    pub fn generate() -> Result<Self> {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng.try_fill_bytes(&mut seed[..]).map_err(|e| {
            Error::KeyGenerationError(format!("secure random source unavailable: {}", e))
        })?;

        // A uniformly random 32-byte string is a valid scalar with
        // overwhelming probability; reject the rest instead of reducing.
        let secret = SecretKey::from_slice(&seed[..])
            .map_err(|_| Error::KeyGenerationError("random scalar out of range".into()))?;

        Self::from_secret(secret, crate::time::now_timestamp_millis())
    }

    /// Rebuild a key pair from its private half
    ///
    /// The public key is recomputed from the scalar, so the result is always
    /// complete.
    pub(crate) fn from_secret(secret: SecretKey, created_at: i64) -> Result<Self> {
        let public = secret.public_key();
        let public_bytes = encode_uncompressed(&public)?;
        Ok(Self {
            secret,
            public,
            public_bytes,
            created_at,
        })
    }

    /// Restore a key pair from an exported JWK string
    pub(crate) fn from_jwk(jwk: &str, created_at: i64) -> Result<Self> {
        let secret = SecretKey::from_jwk_str(jwk)
            .map_err(|_| Error::KeyImportError("stored private key is not a P-256 JWK".into()))?;
        Self::from_secret(secret, created_at)
    }

    /// Export the private key as a JWK string
    ///
    /// ## Security Warning
    ///
    /// Only use this for local persistence. Never log or transmit it.
    pub(crate) fn to_jwk(&self) -> Zeroizing<String> {
        self.secret.to_jwk_string()
    }

    /// Raw uncompressed public key (65 bytes)
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_bytes
    }

    /// Unix timestamp (ms) at which the pair was first generated
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Short hex fingerprint of the public key, safe for logs
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_bytes)
    }

    /// Perform the ECDH exchange with a peer's public key
    ///
    /// Returns the 256-bit X coordinate of the shared point. Both sides
    /// compute the same value:
    /// - Alice: alice_secret × bob_public
    /// - Bob: bob_secret × alice_public
    pub fn diffie_hellman(&self, peer: &PeerPublicKey) -> Zeroizing<[u8; SHARED_SECRET_SIZE]> {
        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer.inner.as_affine());
        let mut out = Zeroizing::new([0u8; SHARED_SECRET_SIZE]);
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        out
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("fingerprint", &self.fingerprint())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// A peer's public key, validated as a point on P-256
#[derive(Clone, Debug)]
pub struct PeerPublicKey {
    inner: P256PublicKey,
    bytes: [u8; PUBLIC_KEY_SIZE],
}

impl PeerPublicKey {
    /// Import raw uncompressed SEC1 bytes
    ///
    /// ## Errors
    ///
    /// `KeyImportError` if the input is not exactly 65 bytes, does not start
    /// with the uncompressed tag, or is not a point on the curve.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(Error::KeyImportError(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )));
        }
        if bytes[0] != UNCOMPRESSED_POINT_TAG {
            return Err(Error::KeyImportError(
                "public key must use the uncompressed point encoding".into(),
            ));
        }

        let inner = P256PublicKey::from_sec1_bytes(bytes)
            .map_err(|_| Error::KeyImportError("public key is not a point on P-256".into()))?;

        let mut fixed = [0u8; PUBLIC_KEY_SIZE];
        fixed.copy_from_slice(bytes);
        Ok(Self { inner, bytes: fixed })
    }

    /// Raw uncompressed bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.bytes
    }

    /// Short hex fingerprint, safe for logs
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.bytes)
    }
}

impl PartialEq for PeerPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for PeerPublicKey {}

/// Hex-encoded prefix of SHA-256 over a public key
pub fn fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

fn encode_uncompressed(public: &P256PublicKey) -> Result<[u8; PUBLIC_KEY_SIZE]> {
    let point = public.to_encoded_point(false);
    point
        .as_bytes()
        .try_into()
        .map_err(|_| Error::KeyImportError("unexpected public key encoding length".into()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp1 = IdentityKeyPair::generate().unwrap();
        let kp2 = IdentityKeyPair::generate().unwrap();

        assert_ne!(kp1.public_bytes(), kp2.public_bytes());
        assert_eq!(kp1.public_bytes().len(), 65);
        assert_eq!(kp1.public_bytes()[0], 0x04);
    }

    #[test]
    fn test_diffie_hellman_is_symmetric() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();

        let alice_view = PeerPublicKey::from_bytes(&bob.public_bytes()).unwrap();
        let bob_view = PeerPublicKey::from_bytes(&alice.public_bytes()).unwrap();

        assert_eq!(
            *alice.diffie_hellman(&alice_view),
            *bob.diffie_hellman(&bob_view)
        );
    }

    #[test]
    fn test_jwk_round_trip_restores_both_halves() {
        let original = IdentityKeyPair::generate().unwrap();
        let jwk = original.to_jwk();

        let restored = IdentityKeyPair::from_jwk(&jwk, original.created_at()).unwrap();

        assert_eq!(restored.public_bytes(), original.public_bytes());
        assert_eq!(restored.created_at(), original.created_at());
    }

    #[test]
    fn test_invalid_jwk_rejected() {
        let result = IdentityKeyPair::from_jwk("{\"kty\":\"EC\"}", 0);
        assert!(matches!(result, Err(Error::KeyImportError(_))));
    }

    #[test]
    fn test_peer_key_wrong_length() {
        let result = PeerPublicKey::from_bytes(&[0x04; 64]);
        assert!(matches!(result, Err(Error::KeyImportError(_))));

        let result = PeerPublicKey::from_bytes(&[]);
        assert!(matches!(result, Err(Error::KeyImportError(_))));
    }

    #[test]
    fn test_peer_key_compressed_rejected() {
        let kp = IdentityKeyPair::generate().unwrap();
        let compressed = kp.public.to_encoded_point(true);

        let result = PeerPublicKey::from_bytes(compressed.as_bytes());
        assert!(matches!(result, Err(Error::KeyImportError(_))));
    }

    #[test]
    fn test_peer_key_not_on_curve() {
        let mut bytes = [0u8; 65];
        bytes[0] = 0x04;
        bytes[64] = 1;

        let result = PeerPublicKey::from_bytes(&bytes);
        assert!(matches!(result, Err(Error::KeyImportError(_))));
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let kp = IdentityKeyPair::generate().unwrap();
        let peer = PeerPublicKey::from_bytes(&kp.public_bytes()).unwrap();

        assert_eq!(kp.fingerprint(), peer.fingerprint());
        assert_eq!(kp.fingerprint().len(), 16);
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = IdentityKeyPair::generate().unwrap();
        let rendered = format!("{:?}", kp);
        let jwk = kp.to_jwk();

        assert!(rendered.contains(&kp.fingerprint()));
        assert!(!rendered.contains("\"d\""));
        assert!(!jwk.is_empty());
    }
}
