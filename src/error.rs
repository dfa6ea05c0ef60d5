//! # Error Handling
//!
//! Error types for the sealed-dm engine.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Lifecycle Errors                                                  │
//! │  │   └── NotInitialized         - No identity key pair is active       │
//! │  │                                                                      │
//! │  ├── Key Material Errors                                               │
//! │  │   ├── KeyGenerationError     - Primitive could not produce a key    │
//! │  │   └── KeyImportError         - Malformed or wrong-length key bytes  │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   └── StorageError           - Local persistence I/O failed         │
//! │  │                                                                      │
//! │  ├── Directory Errors                                                  │
//! │  │   ├── PeerNotEncryptionReady - Peer has no published key            │
//! │  │   └── TransportError         - Directory request failed             │
//! │  │                                                                      │
//! │  ├── Envelope Errors                                                   │
//! │  │   ├── MalformedEnvelope      - Wrong IV/tag length or bad encoding  │
//! │  │   └── AuthenticationFailure  - Tag verification failed              │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      └── SerializationError     - JSON encoding/decoding failed        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No variant ever carries key bytes, shared secrets or plaintext. Messages
//! name identifiers, lengths and public-key fingerprints only.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Lifecycle Errors (100-199)
    // ========================================================================

    /// The local identity key pair is absent (never initialized or cleared)
    #[error("Encryption is not initialized. Call ensure_ready() first.")]
    NotInitialized,

    // ========================================================================
    // Key Material Errors (200-299)
    // ========================================================================

    /// Key pair or IV generation failed
    #[error("Failed to generate key material: {0}")]
    KeyGenerationError(String),

    /// Key bytes could not be imported
    #[error("Invalid key: {0}")]
    KeyImportError(String),

    // ========================================================================
    // Storage Errors (300-399)
    // ========================================================================

    /// Local persistence failed
    #[error("Local key storage failed: {0}")]
    StorageError(String),

    // ========================================================================
    // Directory Errors (400-499)
    // ========================================================================

    /// The peer has not published a public key
    #[error("Peer {0} has not published an encryption key")]
    PeerNotEncryptionReady(String),

    /// The key directory could not be reached or answered unexpectedly
    #[error("Key directory transport error: {0}")]
    TransportError(String),

    // ========================================================================
    // Envelope Errors (500-599)
    // ========================================================================

    /// The envelope does not have the expected shape
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Tag verification failed
    #[error("Message authentication failed")]
    AuthenticationFailure,

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Get a stable numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Lifecycle
    /// - 200-299: Key material
    /// - 300-399: Storage
    /// - 400-499: Directory
    /// - 500-599: Envelope
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::NotInitialized => 100,

            Error::KeyGenerationError(_) => 200,
            Error::KeyImportError(_) => 201,

            Error::StorageError(_) => 300,

            Error::PeerNotEncryptionReady(_) => 400,
            Error::TransportError(_) => 401,

            Error::MalformedEnvelope(_) => 500,
            Error::AuthenticationFailure => 501,

            Error::SerializationError(_) => 900,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can potentially be resolved by retrying later
    /// without any change on the local side.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::TransportError(_) | Error::PeerNotEncryptionReady(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Strip the URL: it may embed identifiers the caller did not ask to log.
        Error::TransportError(err.without_url().to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
