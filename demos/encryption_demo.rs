//! # Encryption Demo
//!
//! Two participants exchange a sealed message through an in-memory key
//! directory, then a tampered copy is rejected.
//!
//! ## Run
//!
//! ```bash
//! RUST_LOG=sealed_dm=debug cargo run --example encryption_demo
//! ```

use std::sync::Arc;

use sealed_dm::crypto::fingerprint;
use sealed_dm::directory::MemoryDirectory;
use sealed_dm::storage::MemoryStore;
use sealed_dm::{counterparty, CryptoEngine, EncryptedEnvelope, EngineConfig};

#[tokio::main]
async fn main() -> sealed_dm::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sealed_dm=info".into()),
        )
        .init();

    println!("=== Sealed DM: End-to-End Encryption Demo ===\n");

    let directory = Arc::new(MemoryDirectory::new());

    // Step 1: Each participant initializes and publishes a key
    println!("Step 1: Initializing Alice and Bob...");

    let alice = CryptoEngine::with_local_storage(
        EngineConfig::default(),
        Arc::new(MemoryStore::new()),
        directory.clone(),
    );
    let bob = CryptoEngine::with_local_storage(
        EngineConfig::default(),
        Arc::new(MemoryStore::new()),
        directory.clone(),
    );

    alice.ensure_ready("alice").await?;
    bob.ensure_ready("bob").await?;

    println!("  Alice's public key: {}...", fingerprint(&alice.public_key()?));
    println!("  Bob's public key:   {}...", fingerprint(&bob.public_key()?));
    println!("  Directory entries:  {}", directory.len());
    println!();

    // Step 2: Alice seals a message for Bob
    println!("Step 2: Alice encrypts \"hello\" for Bob...");

    let payload = alice.seal_text("hello", "bob").await?;
    println!("  Wire payload: {}", payload.to_json()?);
    println!();

    // Step 3: Bob opens it with Alice's identifier
    println!("Step 3: Bob decrypts using Alice's identifier...");

    let peer = counterparty("bob", "alice", "bob").unwrap_or("alice");
    let text = bob.open_text(&payload, peer).await;
    println!("  Decrypted: {:?}", text);
    println!();

    // Step 4: A corrupted tag is rejected
    println!("Step 4: Corrupting the authentication tag...");

    let envelope = payload.to_envelope()?;
    let mut tag = envelope.tag().to_vec();
    tag[0] ^= 0x01;
    let tampered = EncryptedEnvelope::from_parts(
        envelope.ciphertext().to_vec(),
        envelope.iv(),
        &tag,
        envelope.scheme_version(),
    )?;

    match bob.decrypt_from_peer(&tampered, peer).await {
        Ok(_) => println!("  Tampered message decrypted (unexpected!)"),
        Err(failed) => println!("  Rejected ({}), shown as {:?}", failed.reason, failed.placeholder()),
    }
    println!();

    // Step 5: Logout
    println!("Step 5: Logging out...");
    alice.clear();
    bob.clear();
    println!("  Alice state: {:?}", alice.state());
    println!("  Bob state:   {:?}", bob.state());

    println!("\n=== Demo Complete ===");
    Ok(())
}
