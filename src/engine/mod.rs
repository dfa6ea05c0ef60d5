//! # Engine Module
//!
//! [`CryptoEngine`] is the facade the rest of the application talks to. One
//! instance belongs to one logged-in session: build it at login, call
//! [`CryptoEngine::clear`] at logout.
//!
//! ## State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ENGINE STATES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                 ensure_ready(owner)                                     │
//! │  ┌───────────────┐ ─────────────────► ┌──────────────┐                 │
//! │  │ Uninitialized │                    │ Initializing │                 │
//! │  └───────────────┘ ◄───────────────── └──────────────┘                 │
//! │        ▲              failure / clear()       │                         │
//! │        │                                      │ reload, or              │
//! │        │ clear()                              │ generate + publish +    │
//! │        │                                      ▼ persist                 │
//! │        │                              ┌──────────────┐                 │
//! │        └───────────────────────────── │ Ready(owner) │                 │
//! │                                       └──────────────┘                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operation Flow
//!
//! ```text
//! encrypt_for_peer(plaintext, peer)
//!   └─► SharedSecretCache::get_or_fetch(peer)   (directory fetch on miss)
//!         └─► AeadCodec::encrypt(plaintext, key) ─► EncryptedEnvelope
//!
//! decrypt_from_peer(envelope, peer)
//!   └─► SharedSecretCache::get_or_fetch(peer)
//!         └─► AeadCodec::decrypt(envelope, key)
//!               └─► on AuthenticationFailure: refetch peer key once,
//!                   retry only if the peer rotated its key
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::crypto::{
    Aes256GcmCodec, AeadCodec, CacheStats, EncryptedEnvelope, IdentityKeyPair,
    SharedKeyCacheEntry, SharedKeyDerivation, SharedSecretCache, SingleFlightCache,
};
use crate::directory::{PeerKeyDirectory, PeerPublicKeyRecord};
use crate::error::{Error, Result};
use crate::identity::{IdentityKeyStore, LocalIdentityStore};
use crate::messaging::{MessagePayload, DECRYPTION_FAILED_PLACEHOLDER};
use crate::storage::InsecureLocalStore;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How ECDH output becomes an AEAD key; both peers must agree
    pub key_derivation: SharedKeyDerivation,
    /// On reload, republish the local public key if the directory's copy is
    /// missing or different
    pub repair_published_key: bool,
    /// On authentication failure, refetch the peer key once and retry if it
    /// changed
    pub refetch_on_auth_failure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_derivation: SharedKeyDerivation::Raw,
            repair_published_key: true,
            refetch_on_auth_failure: true,
        }
    }
}

// ============================================================================
// STATE
// ============================================================================

/// Externally observable engine state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    /// No identity loaded
    Uninitialized,
    /// An `ensure_ready` call is loading or generating the identity
    Initializing,
    /// Identity loaded for `owner_id`
    Ready {
        /// The local participant
        owner_id: String,
    },
}

struct Session {
    state: EngineState,
    /// Bumped by `clear()` and by owner switches. Work that awaited across a
    /// bump must not touch the shared key cache.
    epoch: u64,
}

// ============================================================================
// DECRYPTION FAILURE
// ============================================================================

/// Coarse cause of a failed decryption, safe to log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptFailureReason {
    /// The engine has no identity loaded
    NotReady,
    /// The sender's key could not be obtained
    PeerUnavailable,
    /// The envelope did not have the expected shape
    Malformed,
    /// Tag verification failed
    Authentication,
}

impl fmt::Display for DecryptFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NotReady => "encryption not initialized",
            Self::PeerUnavailable => "sender key unavailable",
            Self::Malformed => "malformed envelope",
            Self::Authentication => "authentication failed",
        };
        f.write_str(reason)
    }
}

/// Returned by [`CryptoEngine::decrypt_from_peer`] instead of the raw error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Message could not be decrypted: {reason}")]
pub struct DecryptionFailed {
    /// What went wrong
    pub reason: DecryptFailureReason,
}

impl DecryptionFailed {
    /// Text to render in place of the message
    pub fn placeholder(&self) -> &'static str {
        DECRYPTION_FAILED_PLACEHOLDER
    }
}

impl From<&Error> for DecryptionFailed {
    fn from(err: &Error) -> Self {
        let reason = match err {
            Error::NotInitialized | Error::KeyGenerationError(_) | Error::StorageError(_) => {
                DecryptFailureReason::NotReady
            }
            Error::PeerNotEncryptionReady(_)
            | Error::TransportError(_)
            | Error::KeyImportError(_) => DecryptFailureReason::PeerUnavailable,
            Error::MalformedEnvelope(_) | Error::SerializationError(_) => {
                DecryptFailureReason::Malformed
            }
            Error::AuthenticationFailure => DecryptFailureReason::Authentication,
        };
        Self { reason }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// End-to-end encryption facade for one session
pub struct CryptoEngine {
    config: EngineConfig,
    identity: Arc<dyn IdentityKeyStore>,
    directory: Arc<dyn PeerKeyDirectory>,
    cache: Arc<dyn SharedSecretCache>,
    codec: Arc<dyn AeadCodec>,
    session: RwLock<Session>,
    init_lock: tokio::sync::Mutex<()>,
}

impl CryptoEngine {
    /// Create an engine over the given identity store and directory
    ///
    /// Uses a [`SingleFlightCache`] with `config.key_derivation` and the
    /// AES-256-GCM codec.
    pub fn new(
        config: EngineConfig,
        identity: Arc<dyn IdentityKeyStore>,
        directory: Arc<dyn PeerKeyDirectory>,
    ) -> Self {
        let cache = Arc::new(SingleFlightCache::new(config.key_derivation.clone()));
        Self {
            config,
            identity,
            directory,
            cache,
            codec: Arc::new(Aes256GcmCodec),
            session: RwLock::new(Session {
                state: EngineState::Uninitialized,
                epoch: 0,
            }),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create an engine whose identity is persisted in `storage`
    pub fn with_local_storage(
        config: EngineConfig,
        storage: Arc<dyn InsecureLocalStore>,
        directory: Arc<dyn PeerKeyDirectory>,
    ) -> Self {
        Self::new(config, Arc::new(LocalIdentityStore::new(storage)), directory)
    }

    /// Replace the shared key cache
    pub fn with_cache(mut self, cache: Arc<dyn SharedSecretCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the AEAD codec
    pub fn with_codec(mut self, codec: Arc<dyn AeadCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> EngineState {
        self.session.read().state.clone()
    }

    /// The participant the engine is ready for
    pub fn owner_id(&self) -> Option<String> {
        match &self.session.read().state {
            EngineState::Ready { owner_id } => Some(owner_id.clone()),
            _ => None,
        }
    }

    /// Whether `encrypt_for_peer`/`decrypt_from_peer` can run
    pub fn is_ready(&self) -> bool {
        matches!(self.session.read().state, EngineState::Ready { .. })
    }

    /// Shared key cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Load or create the identity for `owner_id`
    ///
    /// - Ready for `owner_id`: no-op
    /// - A persisted identity exists: reload it, then repair the directory's
    ///   copy of the public key if needed
    /// - Otherwise: generate, publish, persist
    ///
    /// Concurrent callers share one initialization. Ready for a different
    /// owner switches identities and empties the shared key cache.
    ///
    /// ## Errors
    ///
    /// Any failure leaves the engine `Uninitialized`. If `clear()` runs while
    /// this call is in flight the result is discarded and `NotInitialized`
    /// is returned.
    pub async fn ensure_ready(&self, owner_id: &str) -> Result<()> {
        if self.is_ready_for(owner_id) {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;

        let (epoch, switching) = {
            let mut session = self.session.write();
            let switching = match &session.state {
                EngineState::Ready { owner_id: current } if current == owner_id => {
                    return Ok(());
                }
                EngineState::Ready { .. } => true,
                _ => false,
            };
            if switching {
                session.epoch = session.epoch.wrapping_add(1);
            }
            session.state = EngineState::Initializing;
            (session.epoch, switching)
        };

        if switching {
            tracing::info!("Switching encryption identity to {}", owner_id);
            self.identity.clear();
        }
        self.cache.clear();

        let result = self.load_or_create(owner_id).await;

        let mut session = self.session.write();
        if session.epoch != epoch {
            drop(session);
            tracing::info!("Initialization for {} cancelled by clear()", owner_id);
            self.identity.clear();
            self.cache.clear();
            return Err(Error::NotInitialized);
        }

        match result {
            Ok(()) => {
                session.state = EngineState::Ready {
                    owner_id: owner_id.to_string(),
                };
                drop(session);
                tracing::info!("Encryption ready for {}", owner_id);
                Ok(())
            }
            Err(e) => {
                session.state = EngineState::Uninitialized;
                drop(session);
                tracing::warn!("Encryption initialization for {} failed: {}", owner_id, e);
                self.identity.clear();
                Err(e)
            }
        }
    }

    fn is_ready_for(&self, owner_id: &str) -> bool {
        matches!(
            &self.session.read().state,
            EngineState::Ready { owner_id: current } if current == owner_id
        )
    }

    async fn load_or_create(&self, owner_id: &str) -> Result<()> {
        if let Some(pair) = self.identity.reload(owner_id).await? {
            if self.config.repair_published_key {
                self.repair_published_key(owner_id, &pair).await;
            }
            return Ok(());
        }

        let pair = self.identity.initialize()?;
        let public_key = self.identity.export_public_key(&pair);

        self.directory
            .publish_public_key(owner_id, &public_key)
            .await?;
        tracing::info!(
            "Published identity key {} for {}",
            pair.fingerprint(),
            owner_id
        );

        self.identity.persist(&pair, owner_id).await?;
        Ok(())
    }

    /// Make sure the directory serves the reloaded public key
    ///
    /// Failures are logged; the local identity is usable either way.
    async fn repair_published_key(&self, owner_id: &str, pair: &IdentityKeyPair) {
        let public_key = self.identity.export_public_key(pair);

        let published = match self.directory.fetch_public_key(owner_id).await {
            Ok(published) => published,
            Err(e) => {
                tracing::warn!("Could not verify published key for {}: {}", owner_id, e);
                return;
            }
        };

        if published.as_deref() == Some(public_key.as_slice()) {
            tracing::debug!("Published key for {} is current", owner_id);
            return;
        }

        tracing::warn!(
            "Directory key for {} is {}, republishing {}",
            owner_id,
            if published.is_some() { "stale" } else { "missing" },
            pair.fingerprint()
        );
        if let Err(e) = self.directory.publish_public_key(owner_id, &public_key).await {
            tracing::warn!("Republishing key for {} failed: {}", owner_id, e);
        }
    }

    /// Drop the identity and every shared key
    ///
    /// Safe while other operations are in flight: they may finish with the
    /// old keys, but nothing new starts until `ensure_ready` succeeds again.
    pub fn clear(&self) {
        {
            let mut session = self.session.write();
            session.epoch = session.epoch.wrapping_add(1);
            session.state = EngineState::Uninitialized;
        }
        self.identity.clear();
        self.cache.clear();
        tracing::info!("Encryption state cleared");
    }

    /// The local public key (65 bytes, uncompressed)
    pub fn public_key(&self) -> Result<Vec<u8>> {
        let pair = self.ready_identity()?;
        Ok(self.identity.export_public_key(&pair))
    }

    fn epoch(&self) -> u64 {
        self.session.read().epoch
    }

    fn ready_identity(&self) -> Result<Arc<IdentityKeyPair>> {
        if !self.is_ready() {
            return Err(Error::NotInitialized);
        }
        self.identity.active()
    }

    // ------------------------------------------------------------------------
    // Encryption
    // ------------------------------------------------------------------------

    /// Encrypt `plaintext` for `peer_id`
    ///
    /// ## Errors
    ///
    /// - `NotInitialized` unless the engine is ready
    /// - `PeerNotEncryptionReady` if the peer never published a key
    /// - `KeyImportError` if the peer's published key is malformed
    /// - `TransportError` from the directory
    pub async fn encrypt_for_peer(
        &self,
        plaintext: &[u8],
        peer_id: &str,
    ) -> Result<EncryptedEnvelope> {
        let identity = self.ready_identity()?;
        let entry = self.shared_key(peer_id, &identity).await?;
        self.codec.encrypt(plaintext, &entry.key)
    }

    /// Decrypt an envelope sent by (or to) `peer_id`
    ///
    /// `peer_id` is the counterparty of the message, see
    /// [`crate::messaging::counterparty`]. Every failure is reported as a
    /// [`DecryptionFailed`] carrying only a coarse reason.
    pub async fn decrypt_from_peer(
        &self,
        envelope: &EncryptedEnvelope,
        peer_id: &str,
    ) -> std::result::Result<Vec<u8>, DecryptionFailed> {
        self.try_decrypt(envelope, peer_id).await.map_err(|e| {
            tracing::warn!("Failed to decrypt message from {}: {}", peer_id, e);
            DecryptionFailed::from(&e)
        })
    }

    async fn try_decrypt(&self, envelope: &EncryptedEnvelope, peer_id: &str) -> Result<Vec<u8>> {
        let epoch = self.epoch();
        let identity = self.ready_identity()?;
        let entry = self.shared_key(peer_id, &identity).await?;

        match self.codec.decrypt(envelope, &entry.key) {
            Err(Error::AuthenticationFailure) if self.config.refetch_on_auth_failure => {
                self.retry_with_current_key(envelope, peer_id, epoch, &identity, &entry)
                    .await
            }
            other => other,
        }
    }

    /// Retry a failed decryption if the peer has published a new key since
    /// `stale` was derived
    ///
    /// `identity` belongs to session `epoch`. If the session ended during the
    /// refetch the cache now belongs to someone else and is left alone.
    async fn retry_with_current_key(
        &self,
        envelope: &EncryptedEnvelope,
        peer_id: &str,
        epoch: u64,
        identity: &IdentityKeyPair,
        stale: &SharedKeyCacheEntry,
    ) -> Result<Vec<u8>> {
        let record = match PeerPublicKeyRecord::fetch(self.directory.as_ref(), peer_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!("Refetching key for {} failed: {}", peer_id, e);
                return Err(Error::AuthenticationFailure);
            }
        };

        if self.epoch() != epoch {
            tracing::debug!("Session ended while refetching key for {}", peer_id);
            return Err(Error::NotInitialized);
        }

        if record.public_key == stale.peer_public_key {
            return Err(Error::AuthenticationFailure);
        }

        tracing::warn!(
            "Peer {} rotated its key from {} to {}",
            peer_id,
            stale.peer_public_key.fingerprint(),
            record.public_key.fingerprint()
        );

        self.cache.invalidate(peer_id);
        let fresh = self
            .cache
            .get(peer_id, identity, record.public_key.as_bytes())
            .await?;

        if self.epoch() != epoch {
            self.cache.invalidate(peer_id);
            return Err(Error::NotInitialized);
        }
        self.codec.decrypt(envelope, &fresh.key)
    }

    async fn shared_key(
        &self,
        peer_id: &str,
        identity: &IdentityKeyPair,
    ) -> Result<Arc<SharedKeyCacheEntry>> {
        self.cache
            .get_or_fetch(peer_id, identity, self.directory.as_ref())
            .await
    }

    /// Forget the shared key for `peer_id`; the next operation refetches the
    /// peer's public key
    pub fn invalidate_peer(&self, peer_id: &str) -> bool {
        self.cache.invalidate(peer_id)
    }

    // ------------------------------------------------------------------------
    // Payload helpers
    // ------------------------------------------------------------------------

    /// Encrypt `text` for `peer_id` into a wire payload
    pub async fn seal_text(&self, text: &str, peer_id: &str) -> Result<MessagePayload> {
        let envelope = self.encrypt_for_peer(text.as_bytes(), peer_id).await?;
        Ok(MessagePayload::from_envelope(&envelope))
    }

    /// Text to display for `payload`
    ///
    /// Unencrypted payloads return their `text`. Encrypted payloads that
    /// cannot be decrypted (or are not UTF-8) return
    /// [`DECRYPTION_FAILED_PLACEHOLDER`].
    pub async fn open_text(&self, payload: &MessagePayload, peer_id: &str) -> String {
        if !payload.is_encrypted {
            return payload.text.clone();
        }

        let envelope = match payload.to_envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Unreadable payload from {}: {}", peer_id, e);
                return DECRYPTION_FAILED_PLACEHOLDER.to_string();
            }
        };

        match self.decrypt_from_peer(&envelope, peer_id).await {
            Ok(plaintext) => String::from_utf8(plaintext).unwrap_or_else(|_| {
                tracing::warn!("Decrypted message from {} is not UTF-8", peer_id);
                DECRYPTION_FAILED_PLACEHOLDER.to_string()
            }),
            Err(failed) => failed.placeholder().to_string(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Directory that counts lookups, answers slowly and can refuse
    /// publication
    #[derive(Default)]
    struct TestDirectory {
        inner: MemoryDirectory,
        fetches: AtomicUsize,
        publishes: AtomicUsize,
        delay_ms: AtomicU64,
        reject_publish: AtomicBool,
    }

    impl TestDirectory {
        fn slow(delay_ms: u64) -> Self {
            Self {
                delay_ms: AtomicU64::new(delay_ms),
                ..Self::default()
            }
        }

        async fn pause(&self) {
            let delay = self.delay_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    #[async_trait]
    impl PeerKeyDirectory for TestDirectory {
        async fn fetch_public_key(&self, peer_id: &str) -> Result<Option<Vec<u8>>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            self.inner.fetch_public_key(peer_id).await
        }

        async fn publish_public_key(&self, owner_id: &str, public_key: &[u8]) -> Result<()> {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            if self.reject_publish.load(Ordering::SeqCst) {
                return Err(Error::TransportError("directory unavailable".into()));
            }
            self.inner.publish_public_key(owner_id, public_key).await
        }
    }

    /// Identity store that counts key generation and reloads
    struct CountingIdentityStore {
        inner: LocalIdentityStore,
        generated: AtomicUsize,
        reloads: AtomicUsize,
    }

    impl CountingIdentityStore {
        fn new(storage: Arc<MemoryStore>) -> Self {
            Self {
                inner: LocalIdentityStore::new(storage),
                generated: AtomicUsize::new(0),
                reloads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityKeyStore for CountingIdentityStore {
        fn initialize(&self) -> Result<Arc<IdentityKeyPair>> {
            self.generated.fetch_add(1, Ordering::SeqCst);
            self.inner.initialize()
        }

        async fn persist(&self, pair: &IdentityKeyPair, owner_id: &str) -> Result<()> {
            self.inner.persist(pair, owner_id).await
        }

        async fn reload(&self, owner_id: &str) -> Result<Option<Arc<IdentityKeyPair>>> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            self.inner.reload(owner_id).await
        }

        fn active(&self) -> Result<Arc<IdentityKeyPair>> {
            self.inner.active()
        }

        fn clear(&self) {
            self.inner.clear()
        }
    }

    fn engine(directory: Arc<dyn PeerKeyDirectory>) -> CryptoEngine {
        CryptoEngine::with_local_storage(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            directory,
        )
    }

    async fn ready_pair(directory: Arc<dyn PeerKeyDirectory>) -> (CryptoEngine, CryptoEngine) {
        let alice = engine(directory.clone());
        let bob = engine(directory);
        alice.ensure_ready("alice").await.unwrap();
        bob.ensure_ready("bob").await.unwrap();
        (alice, bob)
    }

    #[tokio::test]
    async fn test_hello_scenario() {
        let directory = Arc::new(MemoryDirectory::new());
        let (alice, bob) = ready_pair(directory.clone()).await;

        assert_eq!(directory.get("alice").unwrap(), alice.public_key().unwrap());
        assert_eq!(directory.get("bob").unwrap(), bob.public_key().unwrap());

        let envelope = alice.encrypt_for_peer(b"hello", "bob").await.unwrap();
        assert_eq!(bob.decrypt_from_peer(&envelope, "alice").await.unwrap(), b"hello");

        let mut payload = MessagePayload::from_envelope(&envelope);
        let mut tag = envelope.tag().to_vec();
        tag[0] ^= 0x01;
        payload.auth_tag = Some(BASE64.encode(&tag));
        let corrupted = payload.to_envelope().unwrap();

        let failure = bob.decrypt_from_peer(&corrupted, "alice").await.unwrap_err();
        assert_eq!(failure.reason, DecryptFailureReason::Authentication);
        assert_eq!(failure.placeholder(), DECRYPTION_FAILED_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_sender_can_read_own_message() {
        let directory = Arc::new(MemoryDirectory::new());
        let (alice, _bob) = ready_pair(directory).await;

        // A stored message alice sent to bob is decrypted with bob's key.
        let envelope = alice.encrypt_for_peer(b"sent earlier", "bob").await.unwrap();
        let peer = crate::messaging::counterparty("alice", "alice", "bob").unwrap();

        assert_eq!(
            alice.decrypt_from_peer(&envelope, peer).await.unwrap(),
            b"sent earlier"
        );
    }

    #[tokio::test]
    async fn test_operations_require_ready() {
        let alice = engine(Arc::new(MemoryDirectory::new()));
        assert_eq!(alice.state(), EngineState::Uninitialized);

        let result = alice.encrypt_for_peer(b"hi", "bob").await;
        assert!(matches!(result, Err(Error::NotInitialized)));
        assert!(matches!(alice.public_key(), Err(Error::NotInitialized)));

        let envelope = Aes256GcmCodec
            .encrypt(b"hi", &crate::crypto::SymmetricKey::from_bytes([1; 32]))
            .unwrap();
        let failure = alice.decrypt_from_peer(&envelope, "bob").await.unwrap_err();
        assert_eq!(failure.reason, DecryptFailureReason::NotReady);
    }

    #[tokio::test]
    async fn test_unpublished_peer_is_not_ready() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = engine(directory);
        alice.ensure_ready("alice").await.unwrap();

        let result = alice.encrypt_for_peer(b"hi", "carol").await;
        assert!(matches!(result, Err(Error::PeerNotEncryptionReady(_))));
    }

    #[tokio::test]
    async fn test_ensure_ready_is_idempotent() {
        let directory = Arc::new(TestDirectory::default());
        let storage = Arc::new(MemoryStore::new());
        let identity = Arc::new(CountingIdentityStore::new(storage));
        let alice = CryptoEngine::new(EngineConfig::default(), identity.clone(), directory.clone());

        alice.ensure_ready("alice").await.unwrap();
        let key = alice.public_key().unwrap();
        alice.ensure_ready("alice").await.unwrap();

        assert_eq!(alice.public_key().unwrap(), key);
        assert_eq!(identity.generated.load(Ordering::SeqCst), 1);
        assert_eq!(identity.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(directory.publishes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_ready_initializes_once() {
        let directory = Arc::new(TestDirectory::slow(20));
        let storage = Arc::new(MemoryStore::new());
        let identity = Arc::new(CountingIdentityStore::new(storage));
        let alice = CryptoEngine::new(EngineConfig::default(), identity.clone(), directory.clone());

        let calls = (0..8).map(|_| alice.ensure_ready("alice"));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(identity.generated.load(Ordering::SeqCst), 1);
        assert_eq!(identity.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(directory.publishes.load(Ordering::SeqCst), 1);
        assert_eq!(
            alice.state(),
            EngineState::Ready {
                owner_id: "alice".into()
            }
        );
    }

    #[tokio::test]
    async fn test_state_is_initializing_while_in_flight() {
        let directory = Arc::new(TestDirectory::slow(50));
        let alice = engine(directory);

        let observe = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            alice.state()
        };
        let (result, observed) = tokio::join!(alice.ensure_ready("alice"), observe);

        result.unwrap();
        assert_eq!(observed, EngineState::Initializing);
    }

    #[tokio::test]
    async fn test_concurrent_encrypts_fetch_and_derive_once() {
        let directory = Arc::new(TestDirectory::slow(30));
        let (alice, bob) = ready_pair(directory.clone()).await;
        let fetches_before = directory.fetches.load(Ordering::SeqCst);

        let sends = (0..10).map(|i| {
            let alice = &alice;
            async move {
                let text = format!("message {}", i);
                alice.encrypt_for_peer(text.as_bytes(), "bob").await
            }
        });
        let envelopes = futures::future::join_all(sends).await;

        assert_eq!(directory.fetches.load(Ordering::SeqCst) - fetches_before, 1);
        assert_eq!(alice.cache_stats().derivations, 1);

        for (i, envelope) in envelopes.into_iter().enumerate() {
            let plaintext = bob
                .decrypt_from_peer(&envelope.unwrap(), "alice")
                .await
                .unwrap();
            assert_eq!(plaintext, format!("message {}", i).as_bytes());
        }
    }

    #[tokio::test]
    async fn test_reload_reuses_persisted_identity() {
        let directory = Arc::new(MemoryDirectory::new());
        let storage = Arc::new(MemoryStore::new());

        let first = CryptoEngine::with_local_storage(
            EngineConfig::default(),
            storage.clone(),
            directory.clone(),
        );
        first.ensure_ready("alice").await.unwrap();
        let published = first.public_key().unwrap();

        let second =
            CryptoEngine::with_local_storage(EngineConfig::default(), storage, directory.clone());
        second.ensure_ready("alice").await.unwrap();

        assert_eq!(second.public_key().unwrap(), published);
        assert_eq!(directory.get("alice").unwrap(), published);
    }

    #[tokio::test]
    async fn test_reload_repairs_missing_or_stale_directory_key() {
        let directory = Arc::new(MemoryDirectory::new());
        let storage = Arc::new(MemoryStore::new());

        let first = CryptoEngine::with_local_storage(
            EngineConfig::default(),
            storage.clone(),
            directory.clone(),
        );
        first.ensure_ready("alice").await.unwrap();
        let published = first.public_key().unwrap();

        directory.remove("alice");
        let second = CryptoEngine::with_local_storage(
            EngineConfig::default(),
            storage.clone(),
            directory.clone(),
        );
        second.ensure_ready("alice").await.unwrap();
        assert_eq!(directory.get("alice").unwrap(), published);

        directory
            .publish_public_key("alice", &[0x04; 65])
            .await
            .unwrap();
        let third =
            CryptoEngine::with_local_storage(EngineConfig::default(), storage, directory.clone());
        third.ensure_ready("alice").await.unwrap();
        assert_eq!(directory.get("alice").unwrap(), published);
    }

    #[tokio::test]
    async fn test_repair_can_be_disabled() {
        let directory = Arc::new(MemoryDirectory::new());
        let storage = Arc::new(MemoryStore::new());

        let first = CryptoEngine::with_local_storage(
            EngineConfig::default(),
            storage.clone(),
            directory.clone(),
        );
        first.ensure_ready("alice").await.unwrap();
        directory.remove("alice");

        let config = EngineConfig {
            repair_published_key: false,
            ..EngineConfig::default()
        };
        let second = CryptoEngine::with_local_storage(config, storage, directory.clone());
        second.ensure_ready("alice").await.unwrap();

        assert!(directory.get("alice").is_none());
    }

    #[tokio::test]
    async fn test_clear_blocks_new_operations() {
        let directory = Arc::new(MemoryDirectory::new());
        let (alice, _bob) = ready_pair(directory).await;
        let key = alice.public_key().unwrap();
        alice.encrypt_for_peer(b"warm cache", "bob").await.unwrap();

        alice.clear();

        assert_eq!(alice.state(), EngineState::Uninitialized);
        assert!(matches!(
            alice.encrypt_for_peer(b"hi", "bob").await,
            Err(Error::NotInitialized)
        ));
        assert!(!alice.invalidate_peer("bob"));

        alice.ensure_ready("alice").await.unwrap();
        assert_eq!(alice.public_key().unwrap(), key);
    }

    #[tokio::test]
    async fn test_clear_during_initialization_discards_result() {
        let directory = Arc::new(TestDirectory::slow(50));
        let alice = engine(directory);

        let logout = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            alice.clear();
        };
        let (result, _) = tokio::join!(alice.ensure_ready("alice"), logout);

        assert!(matches!(result, Err(Error::NotInitialized)));
        assert_eq!(alice.state(), EngineState::Uninitialized);
        assert!(matches!(alice.public_key(), Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn test_failed_initialization_can_be_retried() {
        let directory = Arc::new(TestDirectory::default());
        directory.reject_publish.store(true, Ordering::SeqCst);
        let alice = engine(directory.clone());

        let result = alice.ensure_ready("alice").await;
        assert!(matches!(result, Err(Error::TransportError(_))));
        assert_eq!(alice.state(), EngineState::Uninitialized);

        directory.reject_publish.store(false, Ordering::SeqCst);
        alice.ensure_ready("alice").await.unwrap();
        assert!(alice.is_ready());
        assert_eq!(
            directory.inner.get("alice").unwrap(),
            alice.public_key().unwrap()
        );
    }

    #[tokio::test]
    async fn test_switching_owner_resets_cache() {
        let directory = Arc::new(MemoryDirectory::new());
        let (alice, _bob) = ready_pair(directory.clone()).await;
        alice.encrypt_for_peer(b"hi", "bob").await.unwrap();
        let alice_key = alice.public_key().unwrap();

        alice.ensure_ready("alice-work").await.unwrap();

        assert_eq!(alice.owner_id().as_deref(), Some("alice-work"));
        assert_ne!(alice.public_key().unwrap(), alice_key);
        assert_eq!(directory.get("alice-work").unwrap(), alice.public_key().unwrap());
        assert!(!alice.invalidate_peer("bob"));
    }

    #[tokio::test]
    async fn test_rotated_peer_key_is_refetched() {
        let directory = Arc::new(TestDirectory::default());
        let (alice, bob) = ready_pair(directory.clone()).await;

        let first = bob.encrypt_for_peer(b"before rotation", "alice").await.unwrap();
        assert_eq!(
            alice.decrypt_from_peer(&first, "bob").await.unwrap(),
            b"before rotation"
        );

        // Bob reinstalls: fresh storage, new key published under the same id.
        let new_bob = engine(directory.clone());
        new_bob.ensure_ready("bob").await.unwrap();
        let second = new_bob
            .encrypt_for_peer(b"after rotation", "alice")
            .await
            .unwrap();

        assert_eq!(
            alice.decrypt_from_peer(&second, "bob").await.unwrap(),
            b"after rotation"
        );

        // The cache now holds the new key.
        let third = alice.encrypt_for_peer(b"welcome back", "bob").await.unwrap();
        assert_eq!(
            new_bob.decrypt_from_peer(&third, "alice").await.unwrap(),
            b"welcome back"
        );
    }

    #[tokio::test]
    async fn test_logout_during_rotation_refetch_leaves_new_session_cache_alone() {
        let directory = Arc::new(TestDirectory::default());
        let (alice, bob) = ready_pair(directory.clone()).await;
        let warm = bob.encrypt_for_peer(b"warm cache", "alice").await.unwrap();
        alice.decrypt_from_peer(&warm, "bob").await.unwrap();

        let new_bob = engine(directory.clone());
        new_bob.ensure_ready("bob").await.unwrap();
        let rotated = new_bob
            .encrypt_for_peer(b"after rotation", "alice")
            .await
            .unwrap();

        // Slow lookups from here on so the relogin lands inside the refetch.
        directory.delay_ms.store(50, Ordering::SeqCst);
        let relogin = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            alice.clear();
            alice.ensure_ready("alice2").await
        };
        let (decrypted, relogged) =
            tokio::join!(alice.decrypt_from_peer(&rotated, "bob"), relogin);

        assert!(decrypted.is_err());
        relogged.unwrap();
        assert_eq!(alice.owner_id().as_deref(), Some("alice2"));

        let envelope = alice
            .encrypt_for_peer(b"hi from alice2", "bob")
            .await
            .unwrap();
        assert_eq!(
            new_bob.decrypt_from_peer(&envelope, "alice2").await.unwrap(),
            b"hi from alice2"
        );
    }

    #[tokio::test]
    async fn test_rotation_refetch_can_be_disabled() {
        let directory = Arc::new(MemoryDirectory::new());
        let config = EngineConfig {
            refetch_on_auth_failure: false,
            ..EngineConfig::default()
        };
        let alice = CryptoEngine::with_local_storage(
            config,
            Arc::new(MemoryStore::new()),
            directory.clone(),
        );
        alice.ensure_ready("alice").await.unwrap();
        let bob = engine(directory.clone());
        bob.ensure_ready("bob").await.unwrap();
        alice.encrypt_for_peer(b"warm cache", "bob").await.unwrap();

        let new_bob = engine(directory);
        new_bob.ensure_ready("bob").await.unwrap();
        let envelope = new_bob.encrypt_for_peer(b"hi", "alice").await.unwrap();

        let failure = alice.decrypt_from_peer(&envelope, "bob").await.unwrap_err();
        assert_eq!(failure.reason, DecryptFailureReason::Authentication);
    }

    #[tokio::test]
    async fn test_garbled_message_keeps_cached_key() {
        let directory = Arc::new(MemoryDirectory::new());
        let (alice, bob) = ready_pair(directory).await;

        let envelope = alice.encrypt_for_peer(b"hello", "bob").await.unwrap();
        let mut ciphertext = envelope.ciphertext().to_vec();
        ciphertext[0] ^= 0x80;
        let garbled = EncryptedEnvelope::from_parts(
            ciphertext,
            envelope.iv(),
            envelope.tag(),
            envelope.scheme_version(),
        )
        .unwrap();

        let failure = bob.decrypt_from_peer(&garbled, "alice").await.unwrap_err();
        assert_eq!(failure.reason, DecryptFailureReason::Authentication);

        assert_eq!(bob.decrypt_from_peer(&envelope, "alice").await.unwrap(), b"hello");
        assert_eq!(bob.cache_stats().derivations, 1);
    }

    #[tokio::test]
    async fn test_hkdf_engines_interoperate() {
        let directory: Arc<dyn PeerKeyDirectory> = Arc::new(MemoryDirectory::new());
        let config = EngineConfig {
            key_derivation: SharedKeyDerivation::hkdf(),
            ..EngineConfig::default()
        };
        let alice = CryptoEngine::with_local_storage(
            config.clone(),
            Arc::new(MemoryStore::new()),
            directory.clone(),
        );
        let bob = CryptoEngine::with_local_storage(
            config,
            Arc::new(MemoryStore::new()),
            directory,
        );
        alice.ensure_ready("alice").await.unwrap();
        bob.ensure_ready("bob").await.unwrap();

        let envelope = alice.encrypt_for_peer(b"hardened", "bob").await.unwrap();
        assert_eq!(bob.decrypt_from_peer(&envelope, "alice").await.unwrap(), b"hardened");
    }

    #[tokio::test]
    async fn test_seal_and_open_text() {
        let directory = Arc::new(MemoryDirectory::new());
        let (alice, bob) = ready_pair(directory).await;

        let payload = alice.seal_text("hello bob", "bob").await.unwrap();
        assert!(payload.is_encrypted);
        assert!(payload.text.is_empty());
        assert_eq!(bob.open_text(&payload, "alice").await, "hello bob");

        let plain = MessagePayload::plaintext("sent before encryption");
        assert_eq!(bob.open_text(&plain, "alice").await, "sent before encryption");

        let mut broken = payload.clone();
        broken.iv = Some("AAAA".into());
        assert_eq!(
            bob.open_text(&broken, "alice").await,
            DECRYPTION_FAILED_PLACEHOLDER
        );
    }

    #[test]
    fn test_failure_reason_mapping() {
        let cases = [
            (Error::NotInitialized, DecryptFailureReason::NotReady),
            (
                Error::PeerNotEncryptionReady("bob".into()),
                DecryptFailureReason::PeerUnavailable,
            ),
            (
                Error::TransportError("down".into()),
                DecryptFailureReason::PeerUnavailable,
            ),
            (
                Error::MalformedEnvelope("short iv".into()),
                DecryptFailureReason::Malformed,
            ),
            (Error::AuthenticationFailure, DecryptFailureReason::Authentication),
        ];

        for (error, reason) in cases {
            assert_eq!(DecryptionFailed::from(&error).reason, reason);
        }
    }
}
